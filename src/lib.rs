mod auth;
mod catalog;
mod requests;
mod reviews;
mod store;
mod usernames;
mod util;

use std::sync::Arc;

pub use auth::*;
pub use catalog::*;
pub use requests::*;
pub use reviews::*;
pub use store::*;
pub use usernames::*;

/// The appdex catalog system, facilitating app listing, moderation,
/// reviews, and authentication over a document store and an auth
/// provider.
pub struct Appdex<P, S> {
    store: Arc<S>,
    provider: Arc<P>,

    pub auth: Auth<P, S>,
    pub catalog: Catalog<S>,
    pub reviews: Reviews<S>,
    pub requests: Requests<S>,
    pub usernames: UsernameRegistry<S>,
}

impl<P, S> Appdex<P, S>
where
    P: AuthProvider,
    S: Store,
{
    pub fn new(provider: P, store: S) -> Self {
        let provider = Arc::new(provider);
        let store = Arc::new(store);

        Self {
            auth: Auth::new(&provider, &store),
            catalog: Catalog::new(&store),
            reviews: Reviews::new(&store),
            requests: Requests::new(&store),
            usernames: UsernameRegistry::new(&store),
            provider,
            store,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }
}
