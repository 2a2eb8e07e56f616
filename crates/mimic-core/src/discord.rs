//! Discord REST transport.
//!
//! The workspace side of the pipeline: guild channel enumeration with
//! permission checks, author resolution, and newest-first message
//! pagination, all against the plain REST API v10.

use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use tracing::warn;

use crate::source::{HistoryPage, MessageSource};
use crate::{Author, Channel, RawMessage};

const API_BASE: &str = "https://discord.com/api/v10";
const PAGE_SIZE: usize = 100;

// Channel types that carry a readable text history.
const GUILD_TEXT: u8 = 0;
const GUILD_ANNOUNCEMENT: u8 = 5;

// Permission bits, per the Discord developer docs.
const ADMINISTRATOR: u64 = 1 << 3;
const VIEW_CHANNEL: u64 = 1 << 10;
const READ_MESSAGE_HISTORY: u64 = 1 << 16;

/// Discord epoch (2015-01-01T00:00:00Z) in milliseconds since Unix epoch.
const DISCORD_EPOCH_MS: i64 = 1_420_070_400_000;

pub struct DiscordSource {
    http: reqwest::Client,
    token: String,
    guild_id: String,
}

impl DiscordSource {
    pub fn new(token: String, guild_id: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("mimic")
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            token,
            guild_id,
        })
    }

    fn auth_header(&self) -> String {
        format!("Bot {}", self.token)
    }

    async fn fetch_roles(&self) -> Result<Vec<DiscordRole>> {
        let url = format!("{}/guilds/{}/roles", API_BASE, self.guild_id);
        let response = call_with_backoff("discord", || {
            self.http.get(&url).header("Authorization", self.auth_header())
        })
        .await?;
        Ok(response.json().await?)
    }

    async fn fetch_self_member(&self) -> Result<DiscordMember> {
        let url = format!("{}/guilds/{}/members/@me", API_BASE, self.guild_id);
        let response = call_with_backoff("discord", || {
            self.http.get(&url).header("Authorization", self.auth_header())
        })
        .await?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl MessageSource for DiscordSource {
    async fn resolve_author(&self, author_id: &str) -> Result<Author> {
        let url = format!("{}/users/{}", API_BASE, author_id);
        let response = call_with_backoff("discord", || {
            self.http.get(&url).header("Authorization", self.auth_header())
        })
        .await?;
        let user: DiscordUser = response.json().await?;
        Ok(Author {
            display_name: display_name(&user),
            id: user.id,
        })
    }

    async fn list_channels(&self) -> Result<Vec<Channel>> {
        let roles = self.fetch_roles().await?;
        let member = self.fetch_self_member().await?;
        let member_id = member
            .user
            .as_ref()
            .map(|u| u.id.clone())
            .ok_or_else(|| anyhow!("guild member response is missing the user object"))?;
        let base = base_permissions(&roles, &member.roles, &self.guild_id);

        let url = format!("{}/guilds/{}/channels", API_BASE, self.guild_id);
        let response = call_with_backoff("discord", || {
            self.http.get(&url).header("Authorization", self.auth_header())
        })
        .await?;
        let channels: Vec<DiscordChannel> = response.json().await?;

        Ok(channels
            .into_iter()
            .filter(|c| matches!(c.kind, GUILD_TEXT | GUILD_ANNOUNCEMENT))
            .map(|c| {
                let effective =
                    channel_permissions(base, &c, &member.roles, &member_id, &self.guild_id);
                let readable = effective & (VIEW_CHANNEL | READ_MESSAGE_HISTORY)
                    == (VIEW_CHANNEL | READ_MESSAGE_HISTORY);
                Channel {
                    name: c.name.clone().unwrap_or_else(|| c.id.clone()),
                    id: c.id,
                    readable,
                }
            })
            .collect())
    }

    async fn history_page(&self, channel_id: &str, cursor: Option<&str>) -> Result<HistoryPage> {
        let mut params: Vec<(&str, String)> = vec![("limit", PAGE_SIZE.to_string())];
        if let Some(before) = cursor {
            params.push(("before", before.to_string()));
        }

        let url = format!("{}/channels/{}/messages", API_BASE, channel_id);
        let response = call_with_backoff("discord", || {
            self.http
                .get(&url)
                .header("Authorization", self.auth_header())
                .query(&params)
        })
        .await?;
        let batch: Vec<DiscordMessage> = response.json().await?;

        // Messages arrive newest-first; the next page starts before the
        // oldest id we just saw. A short page means the history is done.
        let next_cursor = if batch.len() < PAGE_SIZE {
            None
        } else {
            batch.last().map(|m| m.id.clone())
        };
        Ok(HistoryPage {
            messages: batch.into_iter().map(raw_message).collect(),
            next_cursor,
        })
    }
}

/// HTTP helper honoring Discord rate limits: retry on 429 using the
/// Retry-After header, bounded retries on 5xx, everything else surfaces.
async fn call_with_backoff<F>(label: &str, mut builder_fn: F) -> Result<reqwest::Response>
where
    F: FnMut() -> reqwest::RequestBuilder,
{
    let mut retries = 0;
    let mut delay = Duration::from_secs(1);
    let max_retries = 8;

    loop {
        let response = builder_fn().send().await?;
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        if status.as_u16() == 429 {
            if retries >= max_retries {
                return Err(anyhow!("{}: rate limited after {} retries", label, retries));
            }
            // Discord sends Retry-After in seconds, sometimes fractional.
            let wait = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<f64>().ok())
                .map(Duration::from_secs_f64)
                .unwrap_or(delay);
            warn!("{}: rate limited, waiting {:?}", label, wait);
            tokio::time::sleep(wait).await;
            retries += 1;
            delay = std::cmp::min(delay * 2, Duration::from_secs(60));
            continue;
        }

        if status.is_server_error() && retries < 3 {
            warn!("{}: server error {}, retrying...", label, status);
            tokio::time::sleep(delay).await;
            retries += 1;
            delay *= 2;
            continue;
        }

        return Err(anyhow!(
            "{}: HTTP {} - {}",
            label,
            status,
            response.text().await.unwrap_or_default()
        ));
    }
}

fn raw_message(msg: DiscordMessage) -> RawMessage {
    let timestamp = DateTime::parse_from_rfc3339(&msg.timestamp)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| snowflake_to_datetime(&msg.id));
    RawMessage {
        author_name: display_name(&msg.author),
        author_id: msg.author.id,
        timestamp,
        content: msg.content,
        attachments: msg.attachments.into_iter().map(|a| a.url).collect(),
    }
}

fn display_name(user: &DiscordUser) -> String {
    user.global_name
        .clone()
        .unwrap_or_else(|| user.username.clone())
}

/// Message and channel ids are snowflakes; the upper bits encode the
/// creation time.
fn snowflake_to_datetime(id: &str) -> DateTime<Utc> {
    let ms = id
        .parse::<i64>()
        .map(|v| (v >> 22) + DISCORD_EPOCH_MS)
        .unwrap_or(0);
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

/// Guild-level permissions: the @everyone role (it shares the guild id)
/// plus every role the member holds.
fn base_permissions(roles: &[DiscordRole], member_role_ids: &[String], guild_id: &str) -> u64 {
    let mut permissions = roles
        .iter()
        .find(|r| r.id == guild_id)
        .map(DiscordRole::permission_bits)
        .unwrap_or(0);
    for role in roles {
        if member_role_ids.iter().any(|id| id == &role.id) {
            permissions |= role.permission_bits();
        }
    }
    permissions
}

/// Apply a channel's permission overwrites to the member's base
/// permissions: @everyone overwrite first, then the member's role
/// overwrites accumulated together, then the member-specific overwrite.
fn channel_permissions(
    base: u64,
    channel: &DiscordChannel,
    member_role_ids: &[String],
    member_id: &str,
    guild_id: &str,
) -> u64 {
    if base & ADMINISTRATOR != 0 {
        return u64::MAX;
    }

    let overwrites = &channel.permission_overwrites;
    let mut permissions = base;

    if let Some(ow) = overwrites
        .iter()
        .find(|o| o.kind == OVERWRITE_ROLE && o.id == guild_id)
    {
        permissions &= !ow.deny_bits();
        permissions |= ow.allow_bits();
    }

    let mut role_allow = 0u64;
    let mut role_deny = 0u64;
    for ow in overwrites {
        if ow.kind == OVERWRITE_ROLE
            && ow.id != guild_id
            && member_role_ids.iter().any(|id| id == &ow.id)
        {
            role_allow |= ow.allow_bits();
            role_deny |= ow.deny_bits();
        }
    }
    permissions &= !role_deny;
    permissions |= role_allow;

    if let Some(ow) = overwrites
        .iter()
        .find(|o| o.kind == OVERWRITE_MEMBER && o.id == member_id)
    {
        permissions &= !ow.deny_bits();
        permissions |= ow.allow_bits();
    }

    permissions
}

const OVERWRITE_ROLE: u8 = 0;
const OVERWRITE_MEMBER: u8 = 1;

// --- Discord API response types ---

#[derive(Debug, Clone, Deserialize)]
struct DiscordUser {
    id: String,
    username: String,
    global_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct DiscordMember {
    user: Option<DiscordUser>,
    roles: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct DiscordRole {
    id: String,
    // Permission bit sets are serialized as decimal strings.
    permissions: String,
}

impl DiscordRole {
    fn permission_bits(&self) -> u64 {
        self.permissions.parse().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct DiscordChannel {
    id: String,
    #[serde(rename = "type")]
    kind: u8,
    name: Option<String>,
    #[serde(default)]
    permission_overwrites: Vec<PermissionOverwrite>,
}

#[derive(Debug, Clone, Deserialize)]
struct PermissionOverwrite {
    id: String,
    #[serde(rename = "type")]
    kind: u8,
    allow: String,
    deny: String,
}

impl PermissionOverwrite {
    fn allow_bits(&self) -> u64 {
        self.allow.parse().unwrap_or(0)
    }

    fn deny_bits(&self) -> u64 {
        self.deny.parse().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct DiscordMessage {
    id: String,
    content: String,
    timestamp: String,
    author: DiscordUser,
    #[serde(default)]
    attachments: Vec<DiscordAttachment>,
}

#[derive(Debug, Clone, Deserialize)]
struct DiscordAttachment {
    url: String,
}
