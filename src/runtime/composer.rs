use super::controller::{Controller, HandlerSpec, Publisher};
use crate::error::Error;
use std::sync::Arc;

/// Fans lifecycle calls and subscriptions across several controllers,
/// presenting them to the bootstrap loop as a single [`Controller`].
///
/// Construction order is preserved for `set_publisher`/`initialize`/
/// `uninitialize`, matching the "declaration order" requirement: members
/// that depend on an earlier member having initialized first (none do
/// today, but the ordering guarantee is part of the contract) can rely on
/// it.
pub struct MultiControllerComposer {
    members: Vec<Arc<dyn Controller>>,
}

impl MultiControllerComposer {
    pub fn new(members: Vec<Arc<dyn Controller>>) -> Self {
        Self { members }
    }
}

#[async_trait::async_trait]
impl Controller for MultiControllerComposer {
    fn handlers(&self) -> Vec<HandlerSpec> {
        self.members.iter().flat_map(|member| member.handlers()).collect()
    }

    async fn set_publisher(&self, publisher: Publisher) {
        for member in &self.members {
            member.set_publisher(publisher.clone()).await;
        }
    }

    async fn initialize(&self) -> Result<(), Error> {
        for member in &self.members {
            member.initialize().await?;
        }
        Ok(())
    }

    async fn uninitialize(&self) {
        for member in &self.members {
            member.uninitialize().await;
        }
    }
}
