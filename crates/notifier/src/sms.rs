//! Twilio SMS adapter: outbound sends and inbound reply lookup.
//!
//! Sends go to `POST /2010-04-01/Accounts/{sid}/Messages.json`; the returned
//! message SID is the correlation reference. Replies are found by listing the
//! messages sent to our number since the previous listing. An inbound message
//! is linked to the latest message we sent its sender before it arrived, and
//! only while that reference is still outstanding. Everything else comes back
//! unlinked and is filed as unsolicited.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;

use courier_common::types::{Channel, InboundMessage, MessageContent, OutboundMessage, PendingReply};

use crate::error::DeliveryError;
use crate::retry::RetryPolicy;
use crate::{ChannelAdapter, ReplySource};

const TWILIO_API_BASE: &str = "https://api.twilio.com";

/// Upper bound on pages followed in one listing.
const MAX_LIST_PAGES: usize = 20;

/// Each listing reaches this far behind the start of the previous one.
const LISTING_OVERLAP_SECS: i64 = 300;

/// Answered references older than this stop shadowing earlier sends.
const SEND_RETENTION_DAYS: i64 = 7;

/// Configuration for the Twilio SMS provider.
#[derive(Debug, Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
    pub status_callback_url: Option<String>,
    /// Branch for inbound messages from numbers we never texted.
    pub inbound_branch_id: Option<String>,
    pub api_base_url: String,
}

impl TwilioConfig {
    pub fn new(account_sid: &str, auth_token: &str, from_number: &str) -> Self {
        Self {
            account_sid: account_sid.to_string(),
            auth_token: auth_token.to_string(),
            from_number: from_number.to_string(),
            status_callback_url: None,
            inbound_branch_id: None,
            api_base_url: TWILIO_API_BASE.to_string(),
        }
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.api_base_url.trim_end_matches('/'),
            self.account_sid
        )
    }

    fn page_url(&self, next_page_uri: &str) -> String {
        format!("{}{}", self.api_base_url.trim_end_matches('/'), next_page_uri)
    }
}

/// Message resource as returned by the Twilio API.
#[derive(Debug, Deserialize)]
struct TwilioMessage {
    sid: String,
    #[serde(default)]
    from: Option<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    direction: Option<String>,
    #[serde(default)]
    date_sent: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TwilioMessageList {
    #[serde(default)]
    messages: Vec<TwilioMessage>,
    #[serde(default)]
    next_page_uri: Option<String>,
}

/// Bookkeeping shared by successive reply listings.
#[derive(Debug, Default)]
struct ReplyState {
    /// Lower bound of the next listing, unset until one succeeds.
    watermark: Option<DateTime<Utc>>,
    /// Inbound SIDs already handed out, with their receive time.
    seen: HashMap<String, DateTime<Utc>>,
    /// References we were asked about, per destination, oldest first.
    sends: HashMap<String, Vec<PendingReply>>,
}

impl ReplyState {
    fn remember(&mut self, pending: &PendingReply) {
        let sends = self.sends.entry(pending.destination.clone()).or_default();
        if !sends.iter().any(|s| s.reference == pending.reference) {
            sends.push(pending.clone());
            sends.sort_by_key(|s| s.sent_at);
        }
    }

    fn latest_send(&self, destination: &str, at: DateTime<Utc>) -> Option<&PendingReply> {
        self.sends
            .get(destination)?
            .iter()
            .rev()
            .find(|s| s.sent_at <= at)
    }

    /// Forget what no listing starting at `since` can return or match.
    fn prune(&mut self, since: DateTime<Utc>, outstanding: &HashSet<&str>) {
        self.seen.retain(|_, at| *at >= since);

        let retention = since - ChronoDuration::days(SEND_RETENTION_DAYS);
        for sends in self.sends.values_mut() {
            // Only the newest send before `since` can still precede a new reply.
            if let Some(newest) = sends.iter().rposition(|s| s.sent_at <= since) {
                *sends = sends.split_off(newest);
            }
            sends.retain(|s| s.sent_at >= retention || outstanding.contains(s.reference.as_str()));
        }
        self.sends.retain(|_, sends| !sends.is_empty());
    }
}

/// Twilio-backed SMS transport.
pub struct TwilioSmsAdapter {
    config: TwilioConfig,
    http: reqwest::Client,
    retry: RetryPolicy,
    /// Inbound messages received before this are never returned.
    listen_from: DateTime<Utc>,
    state: Mutex<ReplyState>,
}

impl TwilioSmsAdapter {
    /// Build the adapter; `timeout` bounds every request to Twilio.
    pub fn new(config: TwilioConfig, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;

        tracing::info!(
            account_sid = %config.account_sid,
            from = %config.from_number,
            "Twilio SMS adapter initialized"
        );

        Ok(Self {
            config,
            http,
            retry: RetryPolicy::once(),
            listen_from: Utc::now(),
            state: Mutex::new(ReplyState::default()),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Also pick up inbound messages received since `at`.
    pub fn listening_since(mut self, at: DateTime<Utc>) -> Self {
        self.listen_from = at;
        self
    }

    async fn post_message(&self, to_cell: &str, body: &str) -> Result<String, DeliveryError> {
        let mut form = vec![
            ("To", to_cell),
            ("From", self.config.from_number.as_str()),
            ("Body", body),
        ];
        if let Some(callback) = &self.config.status_callback_url {
            form.push(("StatusCallback", callback.as_str()));
        }

        let response = self
            .http
            .post(self.config.messages_url())
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::from_status(status, &body));
        }

        let message: TwilioMessage = response.json().await?;
        Ok(message.sid)
    }

    /// List every message sent to our number on or after the day of `since`.
    async fn list_inbound(&self, since: DateTime<Utc>) -> Result<Vec<TwilioMessage>, DeliveryError> {
        let date_filter = since.date_naive().format("%Y-%m-%d").to_string();
        let mut inbound = Vec::new();
        let mut next_page: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let request = match &next_page {
                Some(uri) => self.http.get(self.config.page_url(uri)),
                None => self.http.get(self.config.messages_url()).query(&[
                    ("To", self.config.from_number.as_str()),
                    ("DateSent>", date_filter.as_str()),
                    ("PageSize", "100"),
                ]),
            };

            let response = request
                .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(DeliveryError::from_status(status, &body));
            }

            let page: TwilioMessageList = response.json().await?;
            inbound.extend(
                page.messages
                    .into_iter()
                    .filter(|m| m.direction.as_deref() == Some("inbound")),
            );

            match page.next_page_uri {
                Some(uri) => next_page = Some(uri),
                None => return Ok(inbound),
            }
        }

        tracing::warn!(pages = MAX_LIST_PAGES, "Inbound SMS listing truncated");
        Ok(inbound)
    }

    /// Lower bound of the next listing.
    fn listing_bound(&self, pending: &[PendingReply]) -> DateTime<Utc> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.watermark.unwrap_or_else(|| {
            pending
                .iter()
                .map(|p| p.sent_at)
                .min()
                .map_or(self.listen_from, |oldest| oldest.min(self.listen_from))
        })
    }

    /// Turn a listing into inbound items, linking the ones that answer an
    /// outstanding reference.
    fn assign(
        &self,
        pending: &[PendingReply],
        listed: Vec<TwilioMessage>,
        since: DateTime<Utc>,
    ) -> Vec<InboundMessage> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        for reply in pending {
            state.remember(reply);
        }
        let outstanding: HashSet<&str> = pending.iter().map(|p| p.reference.as_str()).collect();

        let mut listed: Vec<(DateTime<Utc>, TwilioMessage)> = listed
            .into_iter()
            .filter(|m| !state.seen.contains_key(&m.sid))
            .filter_map(|m| parse_twilio_date(m.date_sent.as_deref()?).map(|at| (at, m)))
            .filter(|(at, _)| *at >= since)
            .collect();
        listed.sort_by_key(|(at, _)| *at);

        let mut claimed: HashSet<String> = HashSet::new();
        let mut inbound = Vec::new();

        for (received_at, message) in listed {
            state.seen.insert(message.sid.clone(), received_at);

            let sender = message.from.as_deref().unwrap_or_default();
            let latest = state.latest_send(sender, received_at).cloned();

            let branch_id = match (&latest, &self.config.inbound_branch_id) {
                (Some(send), _) => send.branch_id.clone(),
                (None, Some(branch_id)) => branch_id.clone(),
                (None, None) => {
                    tracing::warn!(
                        sid = %message.sid,
                        from = %sender,
                        "Inbound SMS from unknown sender and no inbound branch configured; dropping"
                    );
                    continue;
                }
            };

            let mut item = InboundMessage::new(
                &message.sid,
                &branch_id,
                message.from.as_deref(),
                message.body.as_deref().unwrap_or_default(),
            )
            .received_at(received_at);

            // Only the first reply to a reference is linked; later ones are unsolicited.
            if let Some(send) = latest.filter(|s| outstanding.contains(s.reference.as_str())) {
                if claimed.insert(send.reference.clone()) {
                    item = item.replying_to(&send.reference);
                }
            }
            inbound.push(item);
        }

        state.prune(since, &outstanding);
        inbound
    }

    fn advance(&self, listing_started: DateTime<Utc>, since: DateTime<Utc>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let next = listing_started - ChronoDuration::seconds(LISTING_OVERLAP_SECS);
        state.watermark = Some(next.max(since));
    }
}

#[async_trait]
impl ChannelAdapter for TwilioSmsAdapter {
    fn channel(&self) -> Channel {
        Channel::Sms
    }

    async fn send(&self, message: &OutboundMessage) -> Result<String, DeliveryError> {
        let MessageContent::Sms { to_cell, body } = &message.content else {
            return Err(DeliveryError::wrong_channel(Channel::Sms, message));
        };

        tracing::debug!(message_id = %message.id, to = %to_cell, "Sending SMS via Twilio");

        let sid = self
            .retry
            .run(Channel::Sms, || self.post_message(to_cell, body))
            .await?;

        tracing::info!(message_id = %message.id, sid = %sid, "SMS accepted by Twilio");
        Ok(sid)
    }
}

#[async_trait]
impl ReplySource for TwilioSmsAdapter {
    async fn fetch_replies(
        &self,
        pending: &[PendingReply],
    ) -> Result<Vec<InboundMessage>, DeliveryError> {
        let started = Utc::now();
        let since = self.listing_bound(pending);

        let listed = self.list_inbound(since).await?;
        let inbound = self.assign(pending, listed, since);
        self.advance(started, since);

        tracing::debug!(
            since = %since,
            returned = inbound.len(),
            linked = inbound.iter().filter(|m| m.parent_reference.is_some()).count(),
            "Listed inbound SMS"
        );
        Ok(inbound)
    }
}

/// Twilio reports dates in RFC 2822 form (`Thu, 30 Jul 2015 20:12:31 +0000`).
fn parse_twilio_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
