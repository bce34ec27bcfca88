pub mod api;

use crate::agent::ConsultantAgent;
use crate::cli::Args;
use std::error::Error;
use std::sync::Arc;

pub struct Server {
    agent: Arc<ConsultantAgent>,
    args: Args,
}

impl Server {
    pub fn new(agent: Arc<ConsultantAgent>, args: Args) -> Self {
        Self { agent, args }
    }

    pub async fn run(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        api::start_http_server(&self.args, self.agent.clone()).await
    }
}
