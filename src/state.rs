use std::sync::Arc;

use crate::api::client::ApiClient;
use crate::config::Config;
use crate::error::ClientResult;
use crate::queries::Queries;
use crate::session::{Identity, IdentityProvider, MockIdentityProvider, Session, StaticIdentityProvider};
use crate::source::fixtures::FixtureSource;
use crate::source::http::HttpSource;
use crate::source::DataSource;

/// Everything a command needs, wired once per process. The data source and
/// identity provider are picked together from `mock_data`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub queries: Arc<Queries>,
}

impl AppState {
    pub async fn start(config: Config) -> ClientResult<Self> {
        let (source, provider): (Arc<dyn DataSource>, Arc<dyn IdentityProvider>) =
            if config.mock_data {
                (
                    Arc::new(FixtureSource::load(config.mock_latency())?),
                    Arc::new(MockIdentityProvider::new()),
                )
            } else {
                let client = ApiClient::new(&config.api_base, config.request_timeout())?;
                (
                    Arc::new(HttpSource::new(client)),
                    Arc::new(StaticIdentityProvider::new(
                        Identity::new(config.user_id.clone()),
                        config.id_token.clone(),
                    )),
                )
            };

        let session = Session::start(provider, source.clone());
        session.ready().await;
        if config.mock_data {
            session.login().await?;
        }

        Ok(Self {
            config: Arc::new(config),
            queries: Arc::new(Queries::new(source, session)),
        })
    }

    pub fn session(&self) -> &Session {
        self.queries.session()
    }
}
