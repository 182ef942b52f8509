use chat_ids::combine_id;
use chat_protocol::{ChatType, UserConversationState};
use sqlx::PgPool;

use crate::{conversation, user_conversations};
use crate::StorageError;

/// Ensures a direct conversation exists between `sender` and `recipient`, and
/// that both users' conversation lists carry an entry for it.
///
/// The sender's entry starts visible (`is_show = true`); the recipient's
/// starts hidden until they interact with it, matching the first-contact
/// behavior of a direct chat.
pub async fn setup_direct(
    pool: &PgPool,
    sender: &str,
    recipient: &str,
) -> Result<String, StorageError> {
    let conversation_id = combine_id(sender, recipient);
    setup_user_conversation(pool, &conversation_id, sender, ChatType::Direct, true).await?;
    setup_user_conversation(pool, &conversation_id, recipient, ChatType::Direct, false).await?;
    Ok(conversation_id)
}

/// Ensures a group conversation identified by `group_id` exists and that
/// `creator`'s conversation list carries a visible entry for it.
pub async fn create_group_conversation(
    pool: &PgPool,
    group_id: &str,
    creator: &str,
) -> Result<(), StorageError> {
    conversation::insert_if_absent(pool, group_id, ChatType::Group).await?;
    setup_user_conversation(pool, group_id, creator, ChatType::Group, true).await?;
    Ok(())
}

/// Ensures the sender of a group message has a visible conversation-list
/// entry for `group_id`. Per §4.9's `setup_user_conversation`, a group chat
/// has no recipient-side hidden entry the way a direct chat does -- the
/// only party this ever touches is whoever is passed in as sender, and
/// their entry is visible from the start.
pub async fn ensure_group_sender(
    pool: &PgPool,
    group_id: &str,
    sender: &str,
) -> Result<(), StorageError> {
    setup_user_conversation(pool, group_id, sender, ChatType::Group, true).await
}

async fn setup_user_conversation(
    pool: &PgPool,
    conversation_id: &str,
    user_id: &str,
    chat_type: ChatType,
    is_show: bool,
) -> Result<(), StorageError> {
    if matches!(chat_type, ChatType::Direct) {
        conversation::insert_if_absent(pool, conversation_id, chat_type).await?;
    }

    let mut list = user_conversations::find_by_user_id(pool, user_id).await?;
    if list.contains_key(conversation_id) {
        return Ok(());
    }
    list.insert(
        conversation_id.to_owned(),
        UserConversationState {
            conversation_id: conversation_id.to_owned(),
            chat_type,
            is_show,
            total: 0,
            to_read: 0,
            seq: 0,
        },
    );
    user_conversations::update(pool, user_id, &list).await
}
