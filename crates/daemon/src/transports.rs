//! Build channel adapters from provider credentials.
//!
//! A channel whose credentials are missing gets an [`UnconfiguredAdapter`]:
//! its messages fail permanently instead of stopping the daemon from booting.

use std::sync::Arc;
use std::time::Duration;

use courier_common::config::AppConfig;
use courier_common::types::Channel;
use courier_engine::ChannelAdapters;
use courier_notifier::{
    ChannelAdapter, NoReplySource, ReplySource, ResendConfig, ResendEmailAdapter, RetryPolicy,
    TwilioConfig, TwilioSmsAdapter, UnconfiguredAdapter, WhatsAppCloudAdapter, WhatsAppConfig,
};

pub struct Transports {
    pub adapters: ChannelAdapters,
    /// Inbound side of the SMS transport.
    pub replies: Arc<dyn ReplySource>,
}

pub fn build_transports(config: &AppConfig) -> anyhow::Result<Transports> {
    let timeout = Duration::from_secs(config.transport_timeout_secs);

    let (sms, replies): (Arc<dyn ChannelAdapter>, Arc<dyn ReplySource>) = match twilio_config(config)
    {
        Some(twilio) => {
            let twilio = Arc::new(TwilioSmsAdapter::new(twilio, timeout)?);
            (twilio.clone(), twilio)
        }
        None => (
            Arc::new(UnconfiguredAdapter::new(Channel::Sms)),
            Arc::new(NoReplySource),
        ),
    };

    let email: Arc<dyn ChannelAdapter> = match (&config.resend_api_key, &config.email_from) {
        (Some(api_key), Some(from)) => Arc::new(
            ResendEmailAdapter::new(ResendConfig::new(api_key, from), timeout)?.with_retry(
                RetryPolicy::new(
                    config.email_max_attempts,
                    Duration::from_secs(config.email_cool_down_secs),
                ),
            ),
        ),
        _ => Arc::new(UnconfiguredAdapter::new(Channel::Email)),
    };

    let whatsapp: Arc<dyn ChannelAdapter> = match (
        &config.whatsapp_access_token,
        &config.whatsapp_phone_number_id,
    ) {
        (Some(token), Some(phone_number_id)) => Arc::new(WhatsAppCloudAdapter::new(
            WhatsAppConfig::new(token, phone_number_id),
            timeout,
        )?),
        _ => Arc::new(UnconfiguredAdapter::new(Channel::WhatsApp)),
    };

    Ok(Transports {
        adapters: ChannelAdapters {
            email,
            sms,
            whatsapp,
        },
        replies,
    })
}

/// Twilio settings, or `None` unless the SID, token and number are all set.
fn twilio_config(config: &AppConfig) -> Option<TwilioConfig> {
    let (Some(sid), Some(token), Some(number)) = (
        &config.twilio_account_sid,
        &config.twilio_auth_token,
        &config.twilio_number,
    ) else {
        return None;
    };

    let mut twilio = TwilioConfig::new(sid, token, number);
    twilio.status_callback_url = config.twilio_status_callback_url.clone();
    twilio.inbound_branch_id = config.twilio_inbound_branch.clone();
    Some(twilio)
}
