use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use sayit_db::Database;
use sayit_types::api::UpdateProfileRequest;
use sayit_types::events::{EventPayload, SnapshotState};
use sayit_types::models::{Conversation, Message, Profile, Target};

use crate::clock::{Clock, SystemClock};
use crate::config::ChatConfig;
use crate::directory::ConversationDirectory;
use crate::dispatcher::{Dispatcher, EventSender, SubscriptionState};
use crate::error::CoreError;
use crate::presence::{PresenceTracker, TypingUpdate};
use crate::profiles::ProfileStore;
use crate::store::MessageStore;

/// Entry point for every caller. Each method takes the already authenticated
/// user id; nothing here checks credentials.
///
/// Methods block on SQLite. Async callers should run them on
/// `tokio::task::spawn_blocking`.
#[derive(Clone)]
pub struct ChatService {
    inner: Arc<ChatServiceInner>,
}

struct ChatServiceInner {
    config: ChatConfig,
    dispatcher: Dispatcher,
    store: Arc<MessageStore>,
    presence: PresenceTracker,
    directory: ConversationDirectory,
    profiles: ProfileStore,
}

impl ChatService {
    pub fn new(db: Arc<Database>, config: ChatConfig) -> Self {
        Self::with_clock(db, config, Arc::new(SystemClock))
    }

    pub fn with_clock(db: Arc<Database>, config: ChatConfig, clock: Arc<dyn Clock>) -> Self {
        let dispatcher = Dispatcher::new();
        let store = Arc::new(MessageStore::new(db.clone(), clock.clone(), dispatcher.clone()));
        let presence = PresenceTracker::new(clock.clone(), config.typing_timeout);
        let directory = ConversationDirectory::new(db.clone(), clock.clone(), dispatcher.clone(), store.clone());
        let profiles = ProfileStore::new(db, clock);

        Self {
            inner: Arc::new(ChatServiceInner {
                config,
                dispatcher,
                store,
                presence,
                directory,
                profiles,
            }),
        }
    }

    pub fn store(&self) -> &MessageStore {
        &self.inner.store
    }

    pub fn directory(&self) -> &ConversationDirectory {
        &self.inner.directory
    }

    // -- Write API --

    /// Append a message. Sending also ends the sender's typing indicator.
    pub fn send_message(&self, user_id: Uuid, conversation_id: Uuid, text: &str) -> Result<Message, CoreError> {
        let message = self.inner.store.append(conversation_id, user_id, text)?;
        if let Err(e) = self.clear_typing(user_id, conversation_id) {
            warn!("Could not clear typing for {} in {}: {}", user_id, conversation_id, e);
        }
        Ok(message)
    }

    pub fn mark_read(&self, user_id: Uuid, conversation_id: Uuid, upto_sequence: u64) -> Result<(), CoreError> {
        self.inner
            .directory
            .mark_read(conversation_id, user_id, upto_sequence)
    }

    pub fn mark_delivered(&self, user_id: Uuid, conversation_id: Uuid, upto_sequence: u64) -> Result<(), CoreError> {
        self.inner
            .directory
            .mark_delivered(conversation_id, user_id, upto_sequence)
    }

    /// Record a typing signal. The start of a typing run is announced, and
    /// refreshes are re-announced before the last announced expiry runs out.
    /// Unknown conversations and non-participants are ignored.
    ///
    /// Typing changes and their events happen under the conversation lock, so
    /// a concurrent clear or sweep cannot reorder them.
    pub fn set_typing(&self, user_id: Uuid, conversation_id: Uuid) -> Result<(), CoreError> {
        let inner = &self.inner;
        let result = inner.store.with_log(conversation_id, |log| {
            if !log.has_participant(user_id) {
                debug!("Ignoring typing from {} in {}", user_id, conversation_id);
                return Ok(());
            }
            let update = inner.presence.set_typing(conversation_id, user_id);
            if update.announce {
                self.publish_typing(conversation_id, user_id, Some(update));
            }
            Ok(())
        });
        ignore_unknown_conversation(result)
    }

    pub fn clear_typing(&self, user_id: Uuid, conversation_id: Uuid) -> Result<(), CoreError> {
        let inner = &self.inner;
        let result = inner.store.with_log(conversation_id, |_log| {
            if inner.presence.clear_typing(conversation_id, user_id) {
                self.publish_typing(conversation_id, user_id, None);
            }
            Ok(())
        });
        ignore_unknown_conversation(result)
    }

    pub fn is_typing(&self, user_id: Uuid, conversation_id: Uuid) -> bool {
        self.inner.presence.is_typing(conversation_id, user_id)
    }

    /// Open (or find) the conversation between the caller and `participant_ids`.
    pub fn start_conversation(&self, user_id: Uuid, participant_ids: &[Uuid]) -> Result<Conversation, CoreError> {
        let mut members = participant_ids.to_vec();
        members.push(user_id);
        self.inner.directory.get_or_create(&members)
    }

    // -- Read API --

    pub fn get_conversations(&self, user_id: Uuid) -> Result<Vec<Conversation>, CoreError> {
        self.inner.directory.list_for_user(user_id)
    }

    pub fn get_conversation(&self, user_id: Uuid, conversation_id: Uuid) -> Result<Conversation, CoreError> {
        self.inner.directory.get(conversation_id, user_id)
    }

    /// A page of history after `after_sequence`. `limit` is capped at the
    /// configured page size.
    pub fn get_messages(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        after_sequence: u64,
        limit: u32,
    ) -> Result<Vec<Message>, CoreError> {
        if !self.is_participant(user_id, conversation_id)? {
            return Err(CoreError::InvalidConversation);
        }
        let limit = limit.min(self.inner.config.max_page_size);
        self.inner
            .store
            .list_since(conversation_id, after_sequence, limit)
    }

    // -- Subscriptions --

    /// Subscribe `subscriber_id` (one per connection) to `target` on behalf of
    /// `user_id`. The snapshot goes out on `sender` before any event.
    pub fn subscribe(
        &self,
        user_id: Uuid,
        subscriber_id: Uuid,
        target: Target,
        sender: EventSender,
    ) -> Result<SubscriptionState, CoreError> {
        let inner = &self.inner;
        match target {
            Target::Conversation(conversation_id) => {
                // Holding the conversation lock keeps appends out until the
                // subscription is in place.
                inner.store.with_log(conversation_id, |log| {
                    if !log.has_participant(user_id) {
                        return Err(CoreError::InvalidConversation);
                    }
                    inner.dispatcher.subscribe(subscriber_id, target, sender, || {
                        Ok(SnapshotState::Conversation {
                            conversation: inner.directory.get(conversation_id, user_id)?,
                            messages: inner
                                .store
                                .read_latest(conversation_id, inner.config.snapshot_limit)?,
                            typing: inner.presence.typing_users(conversation_id),
                        })
                    })
                })
            }
            Target::Directory(owner) => {
                if owner != user_id {
                    return Err(CoreError::InvalidTarget);
                }
                inner.dispatcher.subscribe(subscriber_id, target, sender, || {
                    Ok(SnapshotState::Directory {
                        conversations: inner.directory.list_for_user(owner)?,
                    })
                })
            }
        }
    }

    pub fn unsubscribe(&self, subscriber_id: Uuid, target: Target) -> bool {
        self.inner.dispatcher.unsubscribe(subscriber_id, target)
    }

    /// Active subscriptions on `target` across all connections.
    pub fn subscriber_count(&self, target: Target) -> usize {
        self.inner.dispatcher.subscriber_count(target)
    }

    // -- Profiles --

    /// `user_id`'s profile as `viewer` sees it. Online state and last seen
    /// are hidden from others when the owner turned `show_last_seen` off.
    pub fn get_profile(&self, viewer: Uuid, user_id: Uuid) -> Result<Option<Profile>, CoreError> {
        let profile = self.inner.profiles.get(user_id)?;
        Ok(profile.map(|profile| self.present(viewer, profile)))
    }

    pub fn update_profile(&self, user_id: Uuid, req: UpdateProfileRequest) -> Result<Profile, CoreError> {
        let profile = self.inner.profiles.update(user_id, req)?;
        Ok(self.present(user_id, profile))
    }

    // -- Connections --

    /// A gateway connection for `user_id` opened.
    pub fn connect(&self, user_id: Uuid) {
        if self.inner.presence.connect(user_id) {
            debug!("{} is online", user_id);
        }
    }

    /// A gateway connection for `user_id` closed. Closing the last one stamps
    /// the user's last seen time.
    pub fn disconnect(&self, user_id: Uuid) -> Result<(), CoreError> {
        if self.inner.presence.disconnect(user_id) {
            debug!("{} is offline", user_id);
            self.inner.profiles.touch_last_seen(user_id)?;
        }
        Ok(())
    }

    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.inner.presence.is_online(user_id)
    }

    // -- Background --

    /// Drop expired typing entries and announce them as stopped. Entries
    /// refreshed since they lapsed are left alone.
    pub fn sweep_typing(&self) -> usize {
        let inner = &self.inner;
        let mut expired = 0;
        for (conversation_id, user_id) in inner.presence.lapsed() {
            let result = inner.store.with_log(conversation_id, |_log| {
                if inner.presence.expire(conversation_id, user_id) {
                    self.publish_typing(conversation_id, user_id, None);
                    return Ok(true);
                }
                Ok(false)
            });
            match result {
                Ok(true) => expired += 1,
                Ok(false) => {}
                Err(CoreError::InvalidConversation) => {
                    inner.presence.expire(conversation_id, user_id);
                }
                Err(e) => warn!("Typing sweep skipped {}: {}", conversation_id, e),
            }
        }
        expired
    }

    /// Runs [`Self::sweep_typing`] on the configured interval until cancelled.
    pub async fn run_typing_sweeper(self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.inner.config.typing_sweep_interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let count = self.sweep_typing();
                    if count > 0 {
                        debug!("Typing sweep: expired {} indicators", count);
                    }
                }
            }
        }
        info!("Typing sweeper stopped");
    }

    fn is_participant(&self, user_id: Uuid, conversation_id: Uuid) -> Result<bool, CoreError> {
        match self.inner.store.participants(conversation_id) {
            Ok(participants) => Ok(participants.binary_search(&user_id).is_ok()),
            Err(CoreError::InvalidConversation) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn present(&self, viewer: Uuid, mut profile: Profile) -> Profile {
        if viewer == profile.user_id || profile.show_last_seen {
            profile.online = self.inner.presence.is_online(profile.user_id);
        } else {
            profile.last_seen_at = None;
        }
        profile
    }

    fn publish_typing(&self, conversation_id: Uuid, user_id: Uuid, typing: Option<TypingUpdate>) {
        self.inner.dispatcher.publish(
            Target::Conversation(conversation_id),
            EventPayload::TypingChanged {
                conversation_id,
                user_id,
                is_typing: typing.is_some(),
                expires_at: typing.map(|u| u.expires_at),
            },
        );
    }
}

fn ignore_unknown_conversation(result: Result<(), CoreError>) -> Result<(), CoreError> {
    match result {
        Err(CoreError::InvalidConversation) => Ok(()),
        other => other,
    }
}
