use agora_types::models::{
    EntitySnapshot, Friendship, FriendshipStatus, Message, MessageStatus, Notification,
    NotificationKey, NotificationKind, User,
};
use anyhow::Result;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, Row};
use uuid::Uuid;

use crate::Database;
use crate::models::{NewNotification, counter_column, entity_table};

const NOTIFICATION_COLUMNS: &str =
    "id, kind, sender_id, recipient_id, reference_id, content, seen, created_at";

impl Database {
    // -- Users --

    pub fn create_user(&self, id: Uuid, username: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, username) VALUES (?1, ?2)",
                (id.to_string(), username),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, username, created_at FROM users WHERE id = ?1",
                [id.to_string()],
                |row| {
                    Ok(User {
                        id: uuid_col(row, 0)?,
                        username: row.get(1)?,
                        created_at: time_col(row, 2)?,
                    })
                },
            )
            .optional()
        })
    }

    // -- Friendships --

    pub fn create_friendship(
        &self,
        id: Uuid,
        requester_id: Uuid,
        addressee_id: Uuid,
        status: FriendshipStatus,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO friendships (id, requester_id, addressee_id, status) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    id.to_string(),
                    requester_id.to_string(),
                    addressee_id.to_string(),
                    status.as_str()
                ],
            )?;
            Ok(())
        })
    }

    /// Accepted friendship between two users, whichever of them asked.
    pub fn get_friendship(&self, user_a: Uuid, user_b: Uuid) -> Result<Option<Friendship>> {
        self.with_conn(|conn| query_friendship(conn, user_a, user_b))
    }

    // -- Messages --

    pub fn insert_message(&self, message: &Message) -> Result<Uuid> {
        let images = serde_json::to_string(&message.images)?;
        let files = serde_json::to_string(&message.files)?;

        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO messages
                    (id, sender_id, recipient_id, friendship_id, content, images, files, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                rusqlite::params![
                    message.id.to_string(),
                    message.sender_id.to_string(),
                    message.recipient_id.to_string(),
                    message.friendship_id.to_string(),
                    message.content,
                    images,
                    files,
                    message.status.as_str(),
                    timestamp(message.created_at),
                    timestamp(message.updated_at),
                ],
            )?;
            Ok(message.id)
        })
    }

    pub fn get_message(&self, id: Uuid) -> Result<Option<Message>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, sender_id, recipient_id, friendship_id, content, images, files, status, created_at, updated_at
                 FROM messages WHERE id = ?1",
                [id.to_string()],
                map_message,
            )
            .optional()
        })
    }

    /// Messages exchanged between two users, in either direction.
    pub fn count_messages_between(&self, user_a: Uuid, user_b: Uuid) -> Result<i64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages
                 WHERE (sender_id = ?1 AND recipient_id = ?2) OR (sender_id = ?2 AND recipient_id = ?1)",
                [user_a.to_string(), user_b.to_string()],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    // -- Aggregate entities --

    /// Owner and current counter of the entity an aggregatable notification
    /// points at. `None` when the kind is not aggregatable or the row is gone.
    pub fn get_entity_for_notification(
        &self,
        kind: NotificationKind,
        reference_id: Uuid,
    ) -> Result<Option<EntitySnapshot>> {
        let Some((target, counter)) = kind.aggregate() else {
            return Ok(None);
        };
        let sql = format!(
            "SELECT owner_id, {} FROM {} WHERE id = ?1",
            counter_column(counter),
            entity_table(target)
        );

        self.with_conn(|conn| {
            conn.query_row(&sql, [reference_id.to_string()], |row| {
                Ok(EntitySnapshot {
                    owner_id: uuid_col(row, 0)?,
                    aggregate_count: row.get(1)?,
                })
            })
            .optional()
        })
    }

    // -- Notifications --

    pub fn find_notification(&self, key: &NotificationKey) -> Result<Option<Notification>> {
        self.with_conn(|conn| query_notification(conn, key))
    }

    /// Insert a notification, or fold it into the row already holding its key.
    ///
    /// Returns the id of the stored row, which is the existing row's id when
    /// the insert lost a race against another writer for the same key. On
    /// conflict the newer of the two writes wins, whichever lands last.
    pub fn insert_notification(&self, notification: &NewNotification) -> Result<Uuid> {
        let conflict = match notification.key() {
            NotificationKey::Reference { .. } => {
                "ON CONFLICT(kind, reference_id) WHERE reference_id IS NOT NULL"
            }
            NotificationKey::Conversation { .. } => {
                "ON CONFLICT(kind, sender_id, recipient_id) WHERE reference_id IS NULL"
            }
        };
        let sql = format!(
            "INSERT INTO notifications ({NOTIFICATION_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             {conflict}
             DO UPDATE SET
                 content = CASE WHEN excluded.created_at >= notifications.created_at
                                THEN excluded.content ELSE notifications.content END,
                 seen = CASE WHEN excluded.created_at >= notifications.created_at
                             THEN excluded.seen ELSE notifications.seen END,
                 created_at = MAX(excluded.created_at, notifications.created_at)
             RETURNING id"
        );

        self.with_conn_mut(|conn| {
            let id = conn.query_row(
                &sql,
                rusqlite::params![
                    Uuid::new_v4().to_string(),
                    notification.kind.as_str(),
                    notification.sender_id.to_string(),
                    notification.recipient_id.to_string(),
                    notification.reference_id.map(|id| id.to_string()),
                    notification.content,
                    notification.seen,
                    timestamp(notification.occurred_at),
                ],
                |row| uuid_col(row, 0),
            )?;
            Ok(id)
        })
    }

    /// Refresh content, seen flag and timestamp of an existing notification
    /// with an event that happened at `occurred_at`. Returns false if the row
    /// no longer exists or already holds a newer event.
    pub fn update_notification(
        &self,
        id: Uuid,
        content: &str,
        seen: bool,
        occurred_at: DateTime<Utc>,
    ) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE notifications SET content = ?2, seen = ?3, created_at = ?4
                 WHERE id = ?1 AND created_at <= ?4",
                rusqlite::params![id.to_string(), content, seen, timestamp(occurred_at)],
            )?;
            Ok(changed > 0)
        })
    }

    /// Newest-first notification feed of one user.
    pub fn list_notifications(&self, recipient_id: Uuid, limit: u32) -> Result<Vec<Notification>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {NOTIFICATION_COLUMNS} FROM notifications
                 WHERE recipient_id = ?1
                 ORDER BY created_at DESC
                 LIMIT ?2"
            ))?;

            let rows = stmt
                .query_map(rusqlite::params![recipient_id.to_string(), limit], map_notification)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    pub fn count_notifications(&self, key: &NotificationKey) -> Result<i64> {
        self.with_conn(|conn| {
            let count: i64 = match key {
                NotificationKey::Reference { kind, reference_id } => conn.query_row(
                    "SELECT COUNT(*) FROM notifications WHERE kind = ?1 AND reference_id = ?2",
                    [kind.as_str().to_string(), reference_id.to_string()],
                    |row| row.get(0),
                )?,
                NotificationKey::Conversation {
                    kind,
                    sender_id,
                    recipient_id,
                } => conn.query_row(
                    "SELECT COUNT(*) FROM notifications
                     WHERE kind = ?1 AND sender_id = ?2 AND recipient_id = ?3 AND reference_id IS NULL",
                    [
                        kind.as_str().to_string(),
                        sender_id.to_string(),
                        recipient_id.to_string(),
                    ],
                    |row| row.get(0),
                )?,
            };
            Ok(count)
        })
    }
}

fn query_friendship(conn: &Connection, user_a: Uuid, user_b: Uuid) -> Result<Option<Friendship>> {
    let mut stmt = conn.prepare(
        "SELECT id, requester_id, addressee_id, status FROM friendships
         WHERE status = 'accepted'
           AND ((requester_id = ?1 AND addressee_id = ?2) OR (requester_id = ?2 AND addressee_id = ?1))
         LIMIT 1",
    )?;

    stmt.query_row([user_a.to_string(), user_b.to_string()], |row| {
        let status: String = row.get(3)?;
        Ok(Friendship {
            id: uuid_col(row, 0)?,
            requester_id: uuid_col(row, 1)?,
            addressee_id: uuid_col(row, 2)?,
            status: match status.as_str() {
                "accepted" => FriendshipStatus::Accepted,
                "blocked" => FriendshipStatus::Blocked,
                _ => FriendshipStatus::Pending,
            },
        })
    })
    .optional()
}

fn query_notification(conn: &Connection, key: &NotificationKey) -> Result<Option<Notification>> {
    match key {
        NotificationKey::Reference { kind, reference_id } => conn
            .query_row(
                &format!(
                    "SELECT {NOTIFICATION_COLUMNS} FROM notifications
                     WHERE kind = ?1 AND reference_id = ?2"
                ),
                [kind.as_str().to_string(), reference_id.to_string()],
                map_notification,
            )
            .optional(),
        NotificationKey::Conversation {
            kind,
            sender_id,
            recipient_id,
        } => conn
            .query_row(
                &format!(
                    "SELECT {NOTIFICATION_COLUMNS} FROM notifications
                     WHERE kind = ?1 AND sender_id = ?2 AND recipient_id = ?3 AND reference_id IS NULL"
                ),
                [
                    kind.as_str().to_string(),
                    sender_id.to_string(),
                    recipient_id.to_string(),
                ],
                map_notification,
            )
            .optional(),
    }
}

fn map_message(row: &Row<'_>) -> rusqlite::Result<Message> {
    let status: String = row.get(7)?;
    Ok(Message {
        id: uuid_col(row, 0)?,
        sender_id: uuid_col(row, 1)?,
        recipient_id: uuid_col(row, 2)?,
        friendship_id: uuid_col(row, 3)?,
        content: row.get(4)?,
        images: json_col(row, 5)?,
        files: json_col(row, 6)?,
        status: MessageStatus::parse(&status).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                7,
                Type::Text,
                format!("unknown message status '{}'", status).into(),
            )
        })?,
        created_at: time_col(row, 8)?,
        updated_at: time_col(row, 9)?,
    })
}

fn map_notification(row: &Row<'_>) -> rusqlite::Result<Notification> {
    let kind: String = row.get(1)?;
    let reference_id: Option<String> = row.get(4)?;
    Ok(Notification {
        id: uuid_col(row, 0)?,
        kind: NotificationKind::parse(&kind),
        sender_id: uuid_col(row, 2)?,
        recipient_id: uuid_col(row, 3)?,
        reference_id: reference_id
            .map(|raw| raw.parse::<Uuid>())
            .transpose()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?,
        content: row.get(5)?,
        seen: row.get(6)?,
        created_at: time_col(row, 7)?,
    })
}

/// Canonical stored form of a timestamp; fixed precision keeps TEXT ordering
/// equal to chronological ordering.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .or_else(|_| {
            // Column defaults use SQLite's "YYYY-MM-DD HH:MM:SS" without timezone.
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
}

fn uuid_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn time_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn json_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Vec<String>> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
