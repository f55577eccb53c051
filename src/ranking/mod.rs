use serde::Serialize;

use crate::cache::{CacheSnapshot, Post};

/// How many posts the `latest` view returns.
pub const LATEST_LIMIT: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRanking {
    pub user_id: String,
    pub username: String,
    pub post_count: usize,
}

/// Selection applied by `GET /posts/:type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostView {
    /// Posts tied for the highest comment count.
    Popular,
    /// The `LATEST_LIMIT` posts with the greatest ids, newest first.
    Latest,
    /// Every cached post, unfiltered. Any unrecognised type lands here.
    All,
}

impl PostView {
    pub fn parse(kind: &str) -> Self {
        match kind {
            "popular" => PostView::Popular,
            "latest" => PostView::Latest,
            _ => PostView::All,
        }
    }
}

/// Users ordered by post count, highest first. The sort is stable, so equal
/// counts keep snapshot order.
pub fn top_users_by_post_count(snapshot: &CacheSnapshot) -> Vec<UserRanking> {
    let mut ranked: Vec<UserRanking> = snapshot
        .users
        .iter()
        .map(|user| UserRanking {
            user_id: user.id.clone(),
            username: user.name.clone(),
            post_count: snapshot.post_count(&user.id),
        })
        .collect();
    ranked.sort_by(|a, b| b.post_count.cmp(&a.post_count));
    ranked
}

pub fn posts_by_type(snapshot: &CacheSnapshot, view: PostView) -> Vec<Post> {
    match view {
        PostView::Popular => {
            let max_comments = snapshot
                .posts
                .iter()
                .map(Post::comment_count)
                .max()
                .unwrap_or(0);
            snapshot
                .posts
                .iter()
                .filter(|p| p.comment_count() == max_comments)
                .cloned()
                .collect()
        }
        PostView::Latest => {
            let mut posts: Vec<&Post> = snapshot.posts.iter().collect();
            posts.sort_by(|a, b| b.id.cmp(&a.id));
            posts.into_iter().take(LATEST_LIMIT).cloned().collect()
        }
        PostView::All => snapshot.posts.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{Comment, User};

    fn post(id: u64, author: u64, comments: usize) -> Post {
        Post {
            id,
            author_id: author,
            content: String::new(),
            comments: (0..comments as u64)
                .map(|c| Comment {
                    id: id * 10 + c,
                    post_id: id,
                    content: String::new(),
                })
                .collect(),
        }
    }

    fn user(id: &str, name: &str) -> User {
        User {
            id: id.to_string(),
            name: name.to_string(),
        }
    }

    fn graph() -> CacheSnapshot {
        CacheSnapshot::assemble(
            vec![
                (user("1", "Ana"), vec![post(1, 1, 1)]),
                (user("2", "Ben"), vec![post(2, 2, 3), post(3, 2, 3)]),
                (user("3", "Cai"), vec![post(4, 3, 2)]),
                (user("4", "Dee"), vec![]),
            ],
            None,
        )
    }

    #[test]
    fn popular_returns_every_post_tied_for_most_comments() {
        let popular = posts_by_type(&graph(), PostView::Popular);
        let ids: Vec<u64> = popular.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn popular_on_empty_snapshot_is_empty() {
        let popular = posts_by_type(&CacheSnapshot::default(), PostView::Popular);
        assert!(popular.is_empty());
    }

    #[test]
    fn latest_takes_five_highest_ids_descending() {
        let snapshot = CacheSnapshot::assemble(
            vec![
                (user("1", "Ana"), vec![post(7, 1, 0), post(2, 1, 0), post(9, 1, 0)]),
                (user("2", "Ben"), vec![post(4, 2, 0), post(11, 2, 0), post(1, 2, 0)]),
            ],
            None,
        );
        let ids: Vec<u64> = posts_by_type(&snapshot, PostView::Latest)
            .iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec![11, 9, 7, 4, 2]);
    }

    #[test]
    fn unknown_type_passes_everything_through() {
        assert_eq!(PostView::parse("trending"), PostView::All);
        assert_eq!(PostView::parse("Popular"), PostView::All);
        let all = posts_by_type(&graph(), PostView::All);
        assert_eq!(all.len(), 4);
    }

    #[test]
    fn top_users_sorted_descending_and_stable() {
        let ranked = top_users_by_post_count(&graph());
        let order: Vec<(&str, usize)> = ranked
            .iter()
            .map(|r| (r.user_id.as_str(), r.post_count))
            .collect();
        // "1" and "3" tie on one post each and keep snapshot order.
        assert_eq!(order, vec![("2", 2), ("1", 1), ("3", 1), ("4", 0)]);
        assert_eq!(ranked[0].username, "Ben");
    }

    #[test]
    fn ranking_serializes_camel_case() {
        let json = serde_json::to_value(&top_users_by_post_count(&graph())[0]).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "userId": "2", "username": "Ben", "postCount": 2 })
        );
    }
}
