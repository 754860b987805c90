use std::{hash::Hash, sync::Arc};

use crate::Data;

/// A named byte source queued for transfer.
#[derive(Clone)]
pub struct File {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub data: Arc<dyn Data>,
}

impl File {
    pub fn len(&self) -> u64 {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl std::fmt::Debug for File {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("File")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .field("len", &self.data.len())
            .finish()
    }
}

impl Hash for File {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
