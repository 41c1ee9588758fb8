// SPDX-License-Identifier: MPL-2.0

use crate::cache::{CacheDb, CacheError, not_found, opt_ts_from_sql, ts_to_sql};
use crate::model::Profile;
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::HashMap;

const PROFILE_COLUMNS: &str = "id, username, display_name, bio, website, profile_picture_url, \
     banner_image_url, follower_count, following_count, created_at";

/// Cache operations for profiles
pub struct ProfileCache<'a> {
    db: &'a CacheDb,
}

impl<'a> ProfileCache<'a> {
    pub fn new(db: &'a CacheDb) -> Self {
        Self { db }
    }

    /// Store a profile (upserts, overwrites everything)
    pub fn store(&self, profile: &Profile) -> Result<(), CacheError> {
        let conn = self.db.conn();
        Self::upsert(&conn, profile, CacheDb::now())
    }

    pub fn store_batch(&self, profiles: &[Profile]) -> Result<(), CacheError> {
        let mut conn = self.db.conn();
        let tx = conn.transaction()?;
        let now = CacheDb::now();
        for profile in profiles {
            Self::upsert(&tx, profile, now)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn upsert(conn: &Connection, profile: &Profile, now: i64) -> Result<(), CacheError> {
        conn.execute(
            r#"
            INSERT INTO profiles (
                id, username, display_name, bio, website,
                profile_picture_url, banner_image_url,
                follower_count, following_count, created_at, fetched_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(id) DO UPDATE SET
                username = excluded.username,
                display_name = excluded.display_name,
                bio = excluded.bio,
                website = excluded.website,
                profile_picture_url = excluded.profile_picture_url,
                banner_image_url = excluded.banner_image_url,
                follower_count = excluded.follower_count,
                following_count = excluded.following_count,
                created_at = COALESCE(excluded.created_at, profiles.created_at),
                fetched_at = excluded.fetched_at
            "#,
            params![
                profile.id,
                profile.username,
                profile.display_name,
                profile.bio,
                profile.website,
                profile.profile_picture_url,
                profile.banner_image_url,
                profile.follower_count,
                profile.following_count,
                profile.created_at.as_ref().map(ts_to_sql),
                now,
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Profile, CacheError> {
        let conn = self.db.conn();
        conn.query_row(
            &format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = ?"),
            [id],
            Self::row_to_profile,
        )
        .map_err(not_found)
    }

    /// Profiles for the given ids, keyed by id. Unknown ids are skipped.
    pub fn get_batch(&self, ids: &[String]) -> Result<HashMap<String, Profile>, CacheError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let conn = self.db.conn();
        let placeholders: Vec<_> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
        let query = format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles WHERE id IN ({})",
            placeholders.join(", ")
        );
        let mut stmt = conn.prepare(&query)?;
        let params: Vec<&dyn rusqlite::ToSql> =
            ids.iter().map(|s| s as &dyn rusqlite::ToSql).collect();

        let profiles = stmt
            .query_map(params.as_slice(), Self::row_to_profile)?
            .map(|r| r.map(|p| (p.id.clone(), p)))
            .collect::<Result<HashMap<_, _>, _>>()?;
        Ok(profiles)
    }

    pub fn set_follower_count(&self, id: &str, followers: u32) -> Result<(), CacheError> {
        self.set_count("follower_count", id, followers)
    }

    pub fn set_following_count(&self, id: &str, following: u32) -> Result<(), CacheError> {
        self.set_count("following_count", id, following)
    }

    /// Shift the follower tally of `id`, never below zero. `None` if the
    /// profile is not cached.
    pub fn adjust_follower_count(&self, id: &str, delta: i64) -> Result<Option<u32>, CacheError> {
        self.adjust("follower_count", id, delta)
    }

    pub fn adjust_following_count(&self, id: &str, delta: i64) -> Result<Option<u32>, CacheError> {
        self.adjust("following_count", id, delta)
    }

    pub fn following_count(&self, id: &str) -> Result<Option<u32>, CacheError> {
        let conn = self.db.conn();
        let count = conn
            .query_row(
                "SELECT following_count FROM profiles WHERE id = ?",
                [id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(count)
    }

    fn set_count(&self, column: &'static str, id: &str, value: u32) -> Result<(), CacheError> {
        let conn = self.db.conn();
        conn.execute(
            &format!("UPDATE profiles SET {column} = ? WHERE id = ?"),
            params![value, id],
        )?;
        Ok(())
    }

    fn adjust(&self, column: &'static str, id: &str, delta: i64) -> Result<Option<u32>, CacheError> {
        let conn = self.db.conn();
        conn.execute(
            &format!("UPDATE profiles SET {column} = MAX({column} + ?1, 0) WHERE id = ?2"),
            params![delta, id],
        )?;
        let count = conn
            .query_row(
                &format!("SELECT {column} FROM profiles WHERE id = ?"),
                [id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(count)
    }

    fn row_to_profile(row: &rusqlite::Row) -> Result<Profile, rusqlite::Error> {
        Ok(Profile {
            id: row.get(0)?,
            username: row.get(1)?,
            display_name: row.get(2)?,
            bio: row.get(3)?,
            website: row.get(4)?,
            profile_picture_url: row.get(5)?,
            banner_image_url: row.get(6)?,
            follower_count: row.get(7)?,
            following_count: row.get(8)?,
            created_at: opt_ts_from_sql(9, row.get(9)?)?,
        })
    }
}
