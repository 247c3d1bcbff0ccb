use std::sync::Arc;

use crate::{bank::AssessmentBanks, catalog::Catalog, chat::Chatbot, store::Store};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub catalog: Arc<Catalog>,
    pub banks: Arc<AssessmentBanks>,
    pub chat: Arc<Chatbot>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        catalog: Arc<Catalog>,
        banks: Arc<AssessmentBanks>,
        chat: Arc<Chatbot>,
    ) -> Self {
        Self {
            store,
            catalog,
            banks,
            chat,
        }
    }
}
