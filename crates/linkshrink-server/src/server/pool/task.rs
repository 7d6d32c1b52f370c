/// A batch of link identifiers to soft-delete on behalf of one user.
///
/// Identifiers are short codes or caller-supplied correlation ids; storage
/// treats them as a set. A task is moved into the queue on submission and
/// then into exactly one worker.
#[derive(Debug, PartialEq, Eq)]
pub struct Task {
    ids: Vec<String>,
    user_id: String,
}

impl Task {
    pub fn new(ids: Vec<String>, user_id: impl Into<String>) -> Self {
        Self {
            ids,
            user_id: user_id.into(),
        }
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }
}
