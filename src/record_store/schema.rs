//! SQLite schema for the local record store.
//!
//! Version 1 added the `achievement_unlock` table.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema, DEFAULT_TIMESTAMP};
use anyhow::Result;
use rusqlite::Connection;

const LIST_ENTRY_TABLE_V_0: Table = Table {
    name: "list_entry",
    columns: &[
        sqlite_column!("user_id", &SqlType::Integer, non_null = true),
        sqlite_column!("title_id", &SqlType::Integer, non_null = true),
        sqlite_column!("list", &SqlType::Text, non_null = true),
        sqlite_column!("added_at", &SqlType::Integer, non_null = true),
        sqlite_column!("current_unit", &SqlType::Integer),
        sqlite_column!("total_units", &SqlType::Integer),
    ],
    indices: &[("idx_list_entry_user", "user_id")],
    unique_constraints: &[&["user_id", "title_id"]],
};

const RANKING_ENTRY_TABLE_V_0: Table = Table {
    name: "ranking_entry",
    columns: &[
        sqlite_column!("user_id", &SqlType::Integer, non_null = true),
        sqlite_column!("title_id", &SqlType::Integer, non_null = true),
        sqlite_column!("rank", &SqlType::Integer, non_null = true),
    ],
    indices: &[("idx_ranking_entry_user", "user_id")],
    unique_constraints: &[&["user_id", "title_id"]],
};

const COMPLETION_RECORD_TABLE_V_0: Table = Table {
    name: "completion_record",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("user_id", &SqlType::Integer, non_null = true),
        sqlite_column!("title_id", &SqlType::Integer, non_null = true),
        sqlite_column!("title", &SqlType::Text, non_null = true),
        sqlite_column!("total_runtime_minutes", &SqlType::Integer, non_null = true),
        sqlite_column!("completed_at", &SqlType::Integer, non_null = true),
        sqlite_column!("runtime_estimated", &SqlType::Integer, non_null = true),
        // JSON arrays
        sqlite_column!("genres", &SqlType::Text, non_null = true),
        sqlite_column!("cast_members", &SqlType::Text, non_null = true),
    ],
    indices: &[("idx_completion_record_user", "user_id")],
    unique_constraints: &[],
};

const ACHIEVEMENT_UNLOCK_TABLE_V_1: Table = Table {
    name: "achievement_unlock",
    columns: &[
        sqlite_column!("user_id", &SqlType::Integer, non_null = true),
        sqlite_column!("achievement_id", &SqlType::Text, non_null = true),
        sqlite_column!(
            "unlocked_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    indices: &[("idx_achievement_unlock_user", "user_id")],
    unique_constraints: &[&["user_id", "achievement_id"]],
};

fn migrate_to_v1(conn: &Connection) -> Result<()> {
    ACHIEVEMENT_UNLOCK_TABLE_V_1.create(conn)
}

pub const VERSIONED_SCHEMAS: &[VersionedSchema] = &[
    VersionedSchema {
        version: 0,
        tables: &[
            LIST_ENTRY_TABLE_V_0,
            RANKING_ENTRY_TABLE_V_0,
            COMPLETION_RECORD_TABLE_V_0,
        ],
        migration: None,
    },
    VersionedSchema {
        version: 1,
        tables: &[
            LIST_ENTRY_TABLE_V_0,
            RANKING_ENTRY_TABLE_V_0,
            COMPLETION_RECORD_TABLE_V_0,
            ACHIEVEMENT_UNLOCK_TABLE_V_1,
        ],
        migration: Some(migrate_to_v1),
    },
];
