use crate::{
    Error, Result,
    types::{BatchItem, BatchResult, Stats, StoredLink, UserLink, generate_short_code},
};
use std::collections::{HashMap, HashSet};

/// Indexed link table shared by the memory and file backends.
///
/// `links` is append-only and keeps creation order; both maps point into it.
/// `by_origin` only indexes live links, so an origin becomes shortenable again
/// once its link is deleted.
#[derive(Clone, Debug, Default)]
pub(crate) struct LinkTable {
    links: Vec<StoredLink>,
    by_short: HashMap<String, usize>,
    by_origin: HashMap<(String, String), usize>,
}

impl LinkTable {
    pub fn from_links(links: Vec<StoredLink>) -> Self {
        let mut table = Self::default();
        for link in links {
            table.push(link);
        }
        table
    }

    pub fn links(&self) -> &[StoredLink] {
        &self.links
    }

    pub fn lookup(&self, short: &str) -> Result<String> {
        let link = self
            .by_short
            .get(short)
            .map(|&idx| &self.links[idx])
            .ok_or_else(|| Error::LinkNotFound {
                short: short.to_owned(),
            })?;

        if link.deleted {
            return Err(Error::LinkGone {
                short: short.to_owned(),
            });
        }
        Ok(link.origin.clone())
    }

    pub fn insert(&mut self, user_id: &str, origin: &str) -> Result<String> {
        if let Some(short) = self.live_short(user_id, origin) {
            return Err(Error::AlreadyShortened { short });
        }
        Ok(self.insert_new(user_id, origin, None))
    }

    pub fn insert_batch(&mut self, user_id: &str, items: Vec<BatchItem>) -> Vec<BatchResult> {
        items
            .into_iter()
            .map(|item| {
                let short = match self.live_short(user_id, &item.origin) {
                    Some(short) => short,
                    None => self.insert_new(
                        user_id,
                        &item.origin,
                        Some(item.correlation_id.clone()),
                    ),
                };
                BatchResult {
                    correlation_id: item.correlation_id,
                    short,
                }
            })
            .collect()
    }

    pub fn links_of(&self, user_id: &str) -> Vec<UserLink> {
        self.links
            .iter()
            .filter(|link| link.user_id == user_id && !link.deleted)
            .map(|link| UserLink {
                short: link.short.clone(),
                origin: link.origin.clone(),
            })
            .collect()
    }

    /// Soft-deletes the owner's links matching `ids` by short code or
    /// correlation id. Returns how many links changed.
    pub fn mark_deleted(&mut self, ids: &[String], user_id: &str) -> usize {
        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let mut marked = 0;

        for link in &mut self.links {
            if link.deleted || link.user_id != user_id {
                continue;
            }
            let by_correlation = link
                .correlation_id
                .as_deref()
                .is_some_and(|id| wanted.contains(id));
            if by_correlation || wanted.contains(link.short.as_str()) {
                link.deleted = true;
                self.by_origin
                    .remove(&(link.user_id.clone(), link.origin.clone()));
                marked += 1;
            }
        }
        marked
    }

    pub fn stats(&self) -> Stats {
        let live = self.links.iter().filter(|link| !link.deleted);
        let users: HashSet<&str> = live.clone().map(|link| link.user_id.as_str()).collect();
        Stats {
            urls: live.count(),
            users: users.len(),
        }
    }

    fn live_short(&self, user_id: &str, origin: &str) -> Option<String> {
        self.by_origin
            .get(&(user_id.to_owned(), origin.to_owned()))
            .map(|&idx| self.links[idx].short.clone())
    }

    fn insert_new(&mut self, user_id: &str, origin: &str, correlation_id: Option<String>) -> String {
        let mut short = generate_short_code();
        while self.by_short.contains_key(&short) {
            short = generate_short_code();
        }
        self.push(StoredLink {
            short: short.clone(),
            origin: origin.to_owned(),
            user_id: user_id.to_owned(),
            correlation_id,
            deleted: false,
        });
        short
    }

    fn push(&mut self, link: StoredLink) {
        let idx = self.links.len();
        self.by_short.insert(link.short.clone(), idx);
        if !link.deleted {
            self.by_origin
                .insert((link.user_id.clone(), link.origin.clone()), idx);
        }
        self.links.push(link);
    }
}
