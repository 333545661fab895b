// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Deep link dispatch.
//!
//! A `neuro://<id>` link names a tiddler by its `neuro.id` field. Dispatching
//! it asks the wiki server embedded in the running app for the matching
//! tiddler, then opens that tiddler by putting it on top of the story list.

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    str::FromStr,
    time::Duration,
};
use tokio::net::TcpStream;
use tracing::{debug, info, instrument};
use url::Url;

/// Link scheme handled by the desktop app.
pub const SCHEME: &str = "neuro://";

/// Tiddler holding the titles of every open tiddler, in display order.
pub const STORY_LIST: &str = "$:/StoryList";

/// Parsed `neuro://` link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeepLink {
    id: String,
}

impl DeepLink {
    /// Opaque identifier the link points at.
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl FromStr for DeepLink {
    type Err = LinkError;

    fn from_str(link: &str) -> Result<Self, Self::Err> {
        let id = link
            .strip_prefix(SCHEME)
            .map(|id| id.trim_end_matches('/'))
            .filter(|id| !id.is_empty())
            .ok_or_else(|| LinkError::InvalidLink(link.into()))?;

        Ok(Self { id: id.into() })
    }
}

impl Display for DeepLink {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(fmt, "{SCHEME}{}", self.id)
    }
}

/// Outcome of dispatching a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    /// Nothing listens on the app port.
    NotRunning,

    /// No tiddler carries the link id.
    NotFound(String),

    /// Tiddler with this title was opened.
    Opened(String),
}

#[derive(Debug, Deserialize)]
struct TiddlerTitle {
    title: String,
}

#[derive(Debug, Default, Deserialize)]
struct StoryList {
    #[serde(default)]
    list: Option<String>,

    #[serde(default)]
    fields: Option<StoryFields>,
}

#[derive(Debug, Default, Deserialize)]
struct StoryFields {
    #[serde(default)]
    list: Option<String>,
}

/// Client of the wiki server embedded in the desktop app.
#[derive(Debug, Clone)]
pub struct WikiClient {
    base: Url,
    client: Client,
}

impl WikiClient {
    /// Construct client for the app listening on target local port.
    ///
    /// # Errors
    ///
    /// - Return [`LinkError::Url`] if no valid URL can be formed.
    pub fn new(port: u16) -> Result<Self> {
        let base = Url::parse(&format!("http://127.0.0.1:{port}/"))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { base, client })
    }

    /// Check whether anything accepts connections on the app port.
    pub async fn is_listening(&self) -> bool {
        let Some(port) = self.base.port() else {
            return false;
        };
        let connect = TcpStream::connect(("127.0.0.1", port));
        matches!(
            tokio::time::timeout(Duration::from_secs(1), connect).await,
            Ok(Ok(_))
        )
    }

    /// Titles of every tiddler matching a filter expression.
    ///
    /// # Errors
    ///
    /// - Return [`LinkError::Http`] if the request fails.
    pub async fn filter(&self, filter: &str) -> Result<Vec<String>> {
        let url = self.base.join("recipes/default/tiddlers.json")?;
        let tiddlers = self
            .client
            .get(url)
            .query(&[("filter", filter)])
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<TiddlerTitle>>()
            .await?;

        Ok(tiddlers.into_iter().map(|tiddler| tiddler.title).collect())
    }

    /// Open tiddler at the top of the story.
    ///
    /// # Errors
    ///
    /// - Return [`LinkError::Http`] if reading or writing the story list
    ///   fails.
    pub async fn open_tiddler(&self, title: &str) -> Result<()> {
        let url = self.tiddler_url(STORY_LIST)?;
        let response = self.client.get(url.clone()).send().await?;
        let story = if response.status() == StatusCode::NOT_FOUND {
            StoryList::default()
        } else {
            response.error_for_status()?.json::<StoryList>().await?
        };

        let current = story
            .fields
            .and_then(|fields| fields.list)
            .or(story.list)
            .unwrap_or_default();
        let mut titles = parse_title_list(&current);
        titles.retain(|existing| existing != title);
        titles.insert(0, title.to_string());
        debug!("story list becomes {titles:?}");

        let body = serde_json::json!({
            "title": STORY_LIST,
            "list": stringify_title_list(&titles),
        });
        self.client
            .put(url)
            .header("X-Requested-With", "TiddlyWiki")
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }

    fn tiddler_url(&self, title: &str) -> Result<Url> {
        let path = format!("recipes/default/tiddlers/{}", urlencoding::encode(title));
        Ok(self.base.join(&path)?)
    }
}

/// Hand link to the running desktop app.
///
/// # Errors
///
/// - Return [`LinkError`] if the app is running but talking to it fails.
#[instrument(skip(client), level = "debug")]
pub async fn dispatch(link: &DeepLink, client: &WikiClient) -> Result<LinkOutcome> {
    if !client.is_listening().await {
        info!("desktop app not running");
        return Ok(LinkOutcome::NotRunning);
    }

    let filter = format!("[search:neuro.id[{}]]", link.id());
    let Some(title) = client.filter(&filter).await?.into_iter().next() else {
        info!("not found: {}", link.id());
        return Ok(LinkOutcome::NotFound(link.id().to_string()));
    };

    client.open_tiddler(&title).await?;
    info!("✓ opened {title:?}");

    Ok(LinkOutcome::Opened(title))
}

/// Split wiki title list, where titles with spaces are wrapped in `[[ ]]`.
fn parse_title_list(list: &str) -> Vec<String> {
    let mut titles = Vec::new();
    let mut rest = list.trim_start();
    while !rest.is_empty() {
        if let Some(bracketed) = rest.strip_prefix("[[") {
            let (title, tail) = bracketed.split_once("]]").unwrap_or((bracketed, ""));
            titles.push(title.to_string());
            rest = tail;
        } else {
            let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
            titles.push(rest[..end].to_string());
            rest = &rest[end..];
        }
        rest = rest.trim_start();
    }
    titles
}

fn stringify_title_list(titles: &[String]) -> String {
    titles
        .iter()
        .map(|title| {
            if title.contains(char::is_whitespace) || title.contains("]]") {
                format!("[[{title}]]")
            } else {
                title.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Deep link error types.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("invalid link {0:?}, expected neuro://<id>")]
    InvalidLink(String),

    #[error(transparent)]
    Url(#[from] url::ParseError),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Friendly result alias :3
pub type Result<T, E = LinkError> = std::result::Result<T, E>;
