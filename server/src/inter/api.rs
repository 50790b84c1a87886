//! Typed operations against the coordination server.
//!
//! Each operation is one round trip over the current [`InterChannel`]. The
//! channel is swapped by the inter link as it reconnects; callers hold an
//! `Arc<InterApi>` and never see the swap.

use crate::error::InterError;
use crate::inter::channel::InterChannel;
use log::warn;
use parking_lot::RwLock;
use shared::packets::inter::*;
use shared::{GameAccount, Packet, SessionRecord};
use std::sync::Arc;

#[derive(Default)]
pub struct InterApi {
    channel: RwLock<Option<Arc<InterChannel>>>,
}

fn acknowledged(packet: &'static str, result: u8) -> Result<(), InterError> {
    if result == InterResult::Ok as u8 {
        Ok(())
    } else {
        Err(InterError::Refused {
            packet,
            code: result,
        })
    }
}

impl InterApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the channel, returning the previous one
    pub fn set_channel(&self, channel: Option<Arc<InterChannel>>) -> Option<Arc<InterChannel>> {
        std::mem::replace(&mut *self.channel.write(), channel)
    }

    pub fn channel(&self) -> Option<Arc<InterChannel>> {
        self.channel.read().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.channel
            .read()
            .as_ref()
            .map_or(false, |channel| channel.is_healthy())
    }

    async fn call<R: InterRequest>(&self, request: &R) -> Result<R::Reply, InterError> {
        let channel = self.channel().ok_or(InterError::ChannelDown)?;
        channel.send_and_receive(request).await
    }

    pub async fn ping(&self) -> Result<(), InterError> {
        self.call(&InterPing).await.map(|_| ())
    }

    pub async fn ping_inter_server(&self) -> bool {
        match self.ping().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Inter server ping failed: {}", e);
                false
            }
        }
    }

    pub async fn get_session(&self, auth_code: u32) -> Result<Option<SessionRecord>, InterError> {
        let reply = self.call(&InterSessionReq { auth_code }).await?;
        Ok(reply.decode()?)
    }

    pub async fn store_session(&self, record: &SessionRecord) -> Result<(), InterError> {
        let ack = self.call(&InterSessionSet::new(record)?).await?;
        acknowledged(InterSessionSet::NAME, ack.result)
    }

    pub async fn delete_session(&self, auth_code: u32) -> Result<(), InterError> {
        let ack = self.call(&InterSessionDel { auth_code }).await?;
        acknowledged(InterSessionDel::NAME, ack.result)
    }

    pub async fn get_game_account(&self, account_id: u32) -> Result<Option<GameAccount>, InterError> {
        let reply = self.call(&InterGameAccountReq { account_id }).await?;
        Ok(reply.decode()?)
    }

    pub async fn store_game_account(&self, account: &GameAccount) -> Result<(), InterError> {
        let ack = self.call(&InterGameAccountSet::new(account)?).await?;
        acknowledged(InterGameAccountSet::NAME, ack.result)
    }

    pub async fn delete_game_account(&self, account_id: u32) -> Result<(), InterError> {
        let ack = self.call(&InterGameAccountDel { account_id }).await?;
        acknowledged(InterGameAccountDel::NAME, ack.result)
    }
}
