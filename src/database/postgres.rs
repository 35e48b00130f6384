use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use include_dir::{include_dir, Dir};

use crate::database::queries::Store;
use crate::database::structs::*;
use crate::platform::SteamId;

/// Connect to the Postgres database and open a connection pool.
pub async fn pg_connect(connection: &str) -> Result<Arc<dyn Store>> {
    let config = tokio_postgres::config::Config::from_str(connection)?;

    log::debug!("using postgres connection config:");
    log::debug!("{:?}", config);

    let pg_mgr = bb8_postgres::PostgresConnectionManager::new(config, tokio_postgres::NoTls);

    let pool = bb8::Pool::builder().build(pg_mgr).await?;

    Ok(Arc::new(PostgresClient(pool)) as Arc<dyn Store>)
}

/// A connection pool that maintains a set of open
/// connections to the database, handing them out for
/// repeated use.
type PostgresPool = bb8::Pool<bb8_postgres::PostgresConnectionManager<tokio_postgres::NoTls>>;

#[derive(Clone)]
struct PostgresClient(PostgresPool);

#[async_trait]
impl Store for PostgresClient {
    async fn migrate(&self) -> Result<()> {
        // Include all migration statements at compile-time:
        static MIGRATION_DIR: Dir = include_dir!("$CARGO_MANIFEST_DIR/src/res/migrations");

        let stmts = |nb: usize| {
            MIGRATION_DIR
                .get_file(format!("{}.sql", nb))
                .and_then(|f| f.contents_utf8())
                .unwrap_or_else(|| panic!("failed to find statements for migration {}", nb))
        };

        let mut conn = self.0.get().await?;
        let transaction = conn.transaction().await?;

        // Run the initial 'migration' that only creates the metadata
        // table if it doesn't exist.
        transaction.batch_execute(stmts(0)).await?;

        // Get the most recently executed migration number.
        let at_migration: usize = {
            let stmt = "SELECT at_migration FROM marshal.meta";
            let row = transaction.query_one(stmt, &[]).await?;
            row.get::<usize, i32>(0) as usize
        };
        log::debug!("database at migration {}", at_migration);

        let most_recent_migration: usize = MIGRATION_DIR.files().count() - 1;
        let pending_migrations = at_migration + 1..most_recent_migration + 1;
        for i in pending_migrations {
            log::info!("run database migration {}...", i);
            transaction.batch_execute(stmts(i)).await?;
            let stmt = "UPDATE marshal.meta SET at_migration = $1";
            transaction.execute(stmt, &[&(i as i32)]).await?;
        }

        transaction.commit().await?;
        Ok(())
    }

    async fn player(&self, player_id: i64) -> Result<Option<User>> {
        let conn = self.0.get().await?;
        let stmt = r#"
            SELECT player_id, steam_id, rating, registered_at
            FROM marshal.users
            WHERE player_id = $1
        "#;
        let row = conn.query_opt(stmt, &[&player_id]).await?;
        Ok(row.map(User::from))
    }

    async fn upsert_player(&self, user: &User) -> Result<()> {
        let conn = self.0.get().await?;
        let stmt = r#"
            INSERT INTO marshal.users
                (player_id, steam_id, rating, registered_at)
            VALUES
                ($1, $2, $3, $4)
            ON CONFLICT (player_id)
            DO UPDATE SET
                steam_id = excluded.steam_id,
                rating = excluded.rating
        "#;
        let _ = conn
            .execute(
                stmt,
                &[
                    &user.player_id,
                    &(user.steam_id.0 as i64),
                    &user.rating,
                    &user.registered_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn rating(&self, player_id: i64) -> Result<Option<i32>> {
        let conn = self.0.get().await?;
        let stmt = "SELECT rating FROM marshal.users WHERE player_id = $1";
        let row = conn.query_opt(stmt, &[&player_id]).await?;
        Ok(row.map(|r| r.get(0)))
    }

    async fn set_rating(&self, player_id: i64, rating: i32) -> Result<()> {
        let conn = self.0.get().await?;
        let stmt = "UPDATE marshal.users SET rating = $2 WHERE player_id = $1";
        let _ = conn.execute(stmt, &[&player_id, &rating]).await?;
        Ok(())
    }

    async fn steam_id(&self, player_id: i64) -> Result<Option<SteamId>> {
        let conn = self.0.get().await?;
        let stmt = "SELECT steam_id FROM marshal.users WHERE player_id = $1";
        let row = conn.query_opt(stmt, &[&player_id]).await?;
        Ok(row.map(|r| SteamId(r.get::<_, i64>(0) as u64)))
    }

    async fn next_game_id(&self) -> Result<i64> {
        let conn = self.0.get().await?;
        let stmt = r#"
            UPDATE marshal.game_counter
            SET counter = counter + 1
            WHERE id = 1
            RETURNING counter
        "#;
        let row = conn.query_one(stmt, &[]).await?;
        Ok(row.get(0))
    }

    async fn insert_match(&self, row: &MatchRow, players: &[MatchPlayerRow]) -> Result<()> {
        let mut conn = self.0.get().await?;
        let transaction = conn.transaction().await?;

        let stmt = r#"
            INSERT INTO marshal.matches
                (match_id, lobby_id, game_id, game_mode, server_region,
                 lobby_type, league_id, state, winning_team)
            VALUES
                ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#;
        let _ = transaction
            .execute(
                stmt,
                &[
                    &row.match_id,
                    &row.lobby_id,
                    &row.game_id,
                    &row.game_mode,
                    &row.server_region,
                    &row.lobby_type,
                    &row.league_id,
                    &row.state,
                    &row.winning_team,
                ],
            )
            .await?;

        let stmt = r#"
            INSERT INTO marshal.match_players
                (match_id, player_id, team, rating_at_start)
            VALUES
                ($1, $2, $3, $4)
        "#;
        for player in players {
            let _ = transaction
                .execute(
                    stmt,
                    &[
                        &player.match_id,
                        &player.player_id,
                        &(player.team as i16),
                        &player.rating_at_start,
                    ],
                )
                .await?;
        }

        transaction.commit().await?;
        Ok(())
    }

    async fn finalize_match(&self, match_id: i64, winning_team: WinningTeam) -> Result<()> {
        let conn = self.0.get().await?;
        let stmt = r#"
            UPDATE marshal.matches
            SET state = 'ended', winning_team = $2
            WHERE match_id = $1
        "#;
        let _ = conn.execute(stmt, &[&match_id, &winning_team]).await?;
        Ok(())
    }

    async fn unfinished_matches(&self) -> Result<Vec<MatchRow>> {
        let conn = self.0.get().await?;
        let stmt = r#"
            SELECT match_id, lobby_id, game_id, game_mode, server_region,
                   lobby_type, league_id, state, winning_team
            FROM marshal.matches
            WHERE state <> 'ended'
            ORDER BY game_id
        "#;
        let rows = conn.query(stmt, &[]).await?;
        Ok(rows.into_iter().map(MatchRow::from).collect())
    }
}
