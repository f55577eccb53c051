//! Time-boxed snapshot of the social graph pulled from upstream.
//!
//! A refresh walks users → posts → comments and assembles a complete
//! [`CacheSnapshot`] off to the side. Only a fully assembled snapshot is
//! published, through an `ArcSwap`, so readers see either the old graph or
//! the new one. Concurrent refreshes collapse onto a single fan-out.

use arc_swap::ArcSwap;
use futures_util::{StreamExt, TryStreamExt, stream};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::UpstreamError;
use crate::upstream::{RequestOptions, UpstreamGateway};

/// Default snapshot lifetime.
pub const DEFAULT_TTL: Duration = Duration::from_millis(60_000);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: u64,
    #[serde(rename = "postid")]
    pub post_id: u64,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: u64,
    #[serde(rename = "userid")]
    pub author_id: u64,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub comments: Vec<Comment>,
}

impl Post {
    pub fn comment_count(&self) -> usize {
        self.comments.len()
    }
}

/// The whole cached graph at one point in time.
#[derive(Debug, Clone, Default)]
pub struct CacheSnapshot {
    /// Users in upstream order.
    pub users: Vec<User>,
    /// Posts in fetch order, each id once.
    pub posts: Vec<Post>,
    post_counts: HashMap<String, usize>,
    pub refreshed_at: Option<Instant>,
}

impl CacheSnapshot {
    /// Builds a snapshot from per-user post lists, as fetched.
    pub fn assemble(entries: Vec<(User, Vec<Post>)>, refreshed_at: Option<Instant>) -> Self {
        let mut users = Vec::with_capacity(entries.len());
        let mut posts = Vec::new();
        let mut post_counts = HashMap::with_capacity(entries.len());
        let mut seen = HashSet::new();

        for (user, user_posts) in entries {
            post_counts.insert(user.id.clone(), user_posts.len());
            for post in user_posts {
                if seen.insert(post.id) {
                    posts.push(post);
                }
            }
            users.push(user);
        }

        Self {
            users,
            posts,
            post_counts,
            refreshed_at,
        }
    }

    /// Number of posts upstream listed for the user.
    pub fn post_count(&self, user_id: &str) -> usize {
        self.post_counts.get(user_id).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty() && self.posts.is_empty()
    }
}

/// How a successful `refresh_if_stale` call was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Snapshot was within its TTL; nothing was fetched.
    Fresh,
    /// This caller ran the fan-out and published a new snapshot.
    Refreshed,
    /// Another caller's fan-out finished while this one waited.
    Joined,
}

impl RefreshOutcome {
    pub fn label(self) -> &'static str {
        match self {
            RefreshOutcome::Fresh => "fresh",
            RefreshOutcome::Refreshed => "refreshed",
            RefreshOutcome::Joined => "joined",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub ttl: Duration,
    pub fetch_timeout: Duration,
    pub fan_out_concurrency: usize,
    pub access_token: Option<String>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            fetch_timeout: Duration::from_millis(2_000),
            fan_out_concurrency: 8,
            access_token: None,
        }
    }
}

#[derive(Deserialize)]
struct UsersPayload {
    /// Object order as sent by upstream.
    #[serde(default)]
    users: serde_json::Map<String, Value>,
}

#[derive(Deserialize)]
struct PostsPayload {
    #[serde(default)]
    posts: Vec<Post>,
}

#[derive(Deserialize)]
struct CommentsPayload {
    #[serde(default)]
    comments: Vec<Comment>,
}

pub struct AggregateCache {
    gateway: Arc<dyn UpstreamGateway>,
    settings: CacheSettings,
    current: ArcSwap<CacheSnapshot>,
    /// Count of finished fan-outs, readable without the refresh lock.
    completed: AtomicU64,
    /// Held for the whole fan-out; guards the last fan-out's error.
    refresh_lock: Mutex<Option<UpstreamError>>,
}

impl AggregateCache {
    pub fn new(gateway: Arc<dyn UpstreamGateway>, settings: CacheSettings) -> Self {
        Self {
            gateway,
            settings,
            current: ArcSwap::from_pointee(CacheSnapshot::default()),
            completed: AtomicU64::new(0),
            refresh_lock: Mutex::new(None),
        }
    }

    /// The currently published snapshot.
    pub fn snapshot(&self) -> Arc<CacheSnapshot> {
        self.current.load_full()
    }

    pub fn ttl(&self) -> Duration {
        self.settings.ttl
    }

    pub fn is_stale(&self, now: Instant) -> bool {
        match self.current.load().refreshed_at {
            Some(at) => now.saturating_duration_since(at) > self.settings.ttl,
            None => true,
        }
    }

    /// Re-fetches the whole graph if the snapshot is older than the TTL.
    ///
    /// At most one fan-out runs at a time. Callers arriving while one is in
    /// flight wait for it and share its result instead of starting another.
    /// On failure the published snapshot and its timestamp are untouched.
    pub async fn refresh_if_stale(&self, now: Instant) -> Result<RefreshOutcome, UpstreamError> {
        if !self.is_stale(now) {
            return Ok(RefreshOutcome::Fresh);
        }

        let observed = self.completed.load(Ordering::Acquire);
        let mut last_error = self.refresh_lock.lock().await;

        if self.completed.load(Ordering::Acquire) != observed {
            return match last_error.as_ref() {
                None => Ok(RefreshOutcome::Joined),
                Some(err) => Err(err.clone()),
            };
        }
        if !self.is_stale(now) {
            return Ok(RefreshOutcome::Fresh);
        }

        let started = Instant::now();
        let result = self.fetch_snapshot(now).await;
        let outcome = match result {
            Ok(snapshot) => {
                info!(
                    "Cache refreshed: {} users, {} posts in {:?}",
                    snapshot.users.len(),
                    snapshot.posts.len(),
                    started.elapsed()
                );
                self.current.store(Arc::new(snapshot));
                *last_error = None;
                Ok(RefreshOutcome::Refreshed)
            }
            Err(err) => {
                warn!("Cache refresh failed, keeping previous snapshot: {}", err);
                *last_error = Some(err.clone());
                Err(err)
            }
        };
        self.completed.fetch_add(1, Ordering::AcqRel);
        outcome
    }

    fn options(&self) -> RequestOptions {
        RequestOptions::with_timeout(self.settings.fetch_timeout)
            .bearer(self.settings.access_token.clone())
    }

    /// Full users → posts → comments walk. Any failure aborts the walk.
    async fn fetch_snapshot(&self, now: Instant) -> Result<CacheSnapshot, UpstreamError> {
        let users = self.fetch_users().await?;
        debug!("Fetched {} users, loading their posts", users.len());

        let width = self.settings.fan_out_concurrency.max(1);
        let entries: Vec<(User, Vec<Post>)> = stream::iter(users)
            .map(|user| async move {
                let posts = self.fetch_posts(&user).await?;
                Ok::<_, UpstreamError>((user, posts))
            })
            .buffered(width)
            .try_collect()
            .await?;

        Ok(CacheSnapshot::assemble(entries, Some(now)))
    }

    async fn fetch_users(&self) -> Result<Vec<User>, UpstreamError> {
        let body = self.gateway.get("/users", self.options()).await?;
        let payload: UsersPayload = decode("/users", body)?;

        let users = payload
            .users
            .into_iter()
            .map(|(id, name)| match name {
                Value::String(name) => Ok(User { id, name }),
                other => Err(UpstreamError::InvalidBody {
                    path: "/users".to_string(),
                    message: format!("user {id} has non-string name {other}"),
                }),
            })
            .collect::<Result<Vec<User>, UpstreamError>>()?;
        Ok(order_users(users))
    }

    async fn fetch_posts(&self, user: &User) -> Result<Vec<Post>, UpstreamError> {
        let path = format!("/users/{}/posts", user.id);
        let body = self.gateway.get(&path, self.options()).await?;
        let payload: PostsPayload = decode(&path, body)?;

        let width = self.settings.fan_out_concurrency.max(1);
        stream::iter(payload.posts)
            .map(|mut post| async move {
                post.comments = self.fetch_comments(post.id).await?;
                Ok::<_, UpstreamError>(post)
            })
            .buffered(width)
            .try_collect()
            .await
    }

    async fn fetch_comments(&self, post_id: u64) -> Result<Vec<Comment>, UpstreamError> {
        let path = format!("/posts/{post_id}/comments");
        let body = self.gateway.get(&path, self.options()).await?;
        let payload: CommentsPayload = decode(&path, body)?;
        Ok(payload.comments)
    }
}

/// Object-key order for the user list: integer-like ids ascending first,
/// then every other id in upstream order.
fn order_users(users: Vec<User>) -> Vec<User> {
    let (mut indexed, named): (Vec<User>, Vec<User>) =
        users.into_iter().partition(|u| index_key(&u.id).is_some());
    indexed.sort_by_key(|u| index_key(&u.id));
    indexed.extend(named);
    indexed
}

/// Canonical array-index form: no sign, no leading zeros, below `u32::MAX`.
fn index_key(id: &str) -> Option<u32> {
    id.parse::<u32>()
        .ok()
        .filter(|n| *n != u32::MAX && n.to_string() == id)
}

fn decode<T: DeserializeOwned>(path: &str, body: Value) -> Result<T, UpstreamError> {
    serde_json::from_value(body).map_err(|e| UpstreamError::InvalidBody {
        path: path.to_string(),
        message: e.to_string(),
    })
}
