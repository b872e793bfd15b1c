//! Schema management for the durable store.
//!
//! Produces and applies the DDL for the configured table: the table itself,
//! a partial index over `expires_at`, an optional trigram index on the key
//! column, the `updated_at` trigger, the expired-row cleanup function and,
//! when a cron expression is configured, a pg_cron job invoking it.
//!
//! Every identifier that reaches DDL or DML is validated against
//! `^[A-Za-z_][A-Za-z0-9_]*$` first; validation failure aborts setup.

use deadpool_postgres::Pool;
use nuvex_core::{NuvexResult, SchemaConfig, SchemaError};
use once_cell::sync::Lazy;
use regex::Regex;

/// Valid SQL identifier shape. Anything else is rejected outright rather
/// than quoted.
static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier regex is valid"));

/// Maximum key length enforced by the column type.
pub const MAX_KEY_BYTES: usize = 512;

/// Applies the store schema against a pool.
pub struct SchemaManager {
    pool: Pool,
    config: SchemaConfig,
}

impl SchemaManager {
    pub fn new(pool: Pool, config: SchemaConfig) -> Self {
        Self { pool, config }
    }

    /// Check a single identifier.
    pub fn validate_identifier(identifier: &str) -> Result<(), SchemaError> {
        if IDENTIFIER_RE.is_match(identifier) {
            Ok(())
        } else {
            Err(SchemaError::InvalidIdentifier {
                identifier: identifier.to_string(),
            })
        }
    }

    /// Check every identifier a schema config will interpolate.
    pub fn validate(config: &SchemaConfig) -> Result<(), SchemaError> {
        Self::validate_identifier(&config.table_name)?;
        Self::validate_identifier(&config.key_column)?;
        Self::validate_identifier(&config.value_column)?;
        Ok(())
    }

    /// The CREATE TABLE statement for this configuration.
    pub fn table_ddl(config: &SchemaConfig) -> String {
        let t = &config.table_name;
        let k = &config.key_column;
        let v = &config.value_column;
        format!(
            "CREATE TABLE IF NOT EXISTS {t} (\n\
             \x20   id BIGSERIAL PRIMARY KEY,\n\
             \x20   {k} VARCHAR({MAX_KEY_BYTES}) NOT NULL UNIQUE,\n\
             \x20   {v} JSONB NOT NULL,\n\
             \x20   expires_at TIMESTAMPTZ,\n\
             \x20   created_at TIMESTAMPTZ NOT NULL DEFAULT now(),\n\
             \x20   updated_at TIMESTAMPTZ NOT NULL DEFAULT now()\n\
             )"
        )
    }

    /// Partial index covering only rows that can expire.
    pub fn expiry_index_ddl(config: &SchemaConfig) -> String {
        let t = &config.table_name;
        format!(
            "CREATE INDEX IF NOT EXISTS {t}_expires_at_idx ON {t} (expires_at) \
             WHERE expires_at IS NOT NULL"
        )
    }

    /// Trigram index for fuzzy key lookup. Requires the pg_trgm extension.
    pub fn trigram_index_ddl(config: &SchemaConfig) -> String {
        let t = &config.table_name;
        let k = &config.key_column;
        format!("CREATE INDEX IF NOT EXISTS {t}_{k}_trgm_idx ON {t} USING gin ({k} gin_trgm_ops)")
    }

    /// Trigger function + trigger stamping `updated_at` before each update.
    pub fn trigger_ddl(config: &SchemaConfig) -> Vec<String> {
        let t = &config.table_name;
        vec![
            format!(
                "CREATE OR REPLACE FUNCTION {t}_touch_updated_at() RETURNS trigger AS $$\n\
                 BEGIN\n\
                 \x20   NEW.updated_at = now();\n\
                 \x20   RETURN NEW;\n\
                 END;\n\
                 $$ LANGUAGE plpgsql"
            ),
            format!("DROP TRIGGER IF EXISTS {t}_touch_updated_at ON {t}"),
            format!(
                "CREATE TRIGGER {t}_touch_updated_at BEFORE UPDATE ON {t} \
                 FOR EACH ROW EXECUTE FUNCTION {t}_touch_updated_at()"
            ),
        ]
    }

    /// SQL function purging expired rows and returning the purge count.
    pub fn cleanup_function_ddl(config: &SchemaConfig) -> String {
        let t = &config.table_name;
        format!(
            "CREATE OR REPLACE FUNCTION cleanup_expired_{t}() RETURNS bigint AS $$\n\
             DECLARE\n\
             \x20   purged bigint;\n\
             BEGIN\n\
             \x20   DELETE FROM {t} WHERE expires_at IS NOT NULL AND expires_at <= now();\n\
             \x20   GET DIAGNOSTICS purged = ROW_COUNT;\n\
             \x20   RETURN purged;\n\
             END;\n\
             $$ LANGUAGE plpgsql"
        )
    }

    /// The pg_cron job name for this table.
    pub fn cron_job_name(config: &SchemaConfig) -> String {
        format!("nuvex_cleanup_{}", config.table_name)
    }

    /// Apply the full schema. Setup failures are fatal.
    pub async fn ensure(&self) -> NuvexResult<()> {
        Self::validate(&self.config)?;

        let client = self.pool.get().await.map_err(|e| SchemaError::Setup {
            step: "acquire client".to_string(),
            reason: e.to_string(),
        })?;

        let mut statements: Vec<(String, String)> = vec![
            ("create table".to_string(), Self::table_ddl(&self.config)),
            (
                "expiry index".to_string(),
                Self::expiry_index_ddl(&self.config),
            ),
        ];
        if self.config.trigram_index {
            statements.push((
                "pg_trgm extension".to_string(),
                "CREATE EXTENSION IF NOT EXISTS pg_trgm".to_string(),
            ));
            statements.push((
                "trigram index".to_string(),
                Self::trigram_index_ddl(&self.config),
            ));
        }
        for ddl in Self::trigger_ddl(&self.config) {
            statements.push(("updated_at trigger".to_string(), ddl));
        }
        statements.push((
            "cleanup function".to_string(),
            Self::cleanup_function_ddl(&self.config),
        ));

        for (step, ddl) in &statements {
            client
                .batch_execute(ddl)
                .await
                .map_err(|e| SchemaError::Setup {
                    step: step.clone(),
                    reason: e.to_string(),
                })?;
        }

        if let Some(schedule) = self.config.cleanup_schedule.clone() {
            self.schedule_cleanup(&client, &schedule).await?;
        }

        tracing::info!(
            table = %self.config.table_name,
            trigram = self.config.trigram_index,
            scheduled = self.config.cleanup_schedule.is_some(),
            "store schema ensured"
        );
        Ok(())
    }

    /// Register the cleanup function with pg_cron. A missing extension is a
    /// hard failure: the operator asked for a schedule the database cannot
    /// provide.
    async fn schedule_cleanup(
        &self,
        client: &deadpool_postgres::Object,
        schedule: &str,
    ) -> NuvexResult<()> {
        let installed: bool = client
            .query_one(
                "SELECT EXISTS(SELECT 1 FROM pg_extension WHERE extname = 'pg_cron')",
                &[],
            )
            .await
            .map_err(|e| SchemaError::Setup {
                step: "probe pg_cron".to_string(),
                reason: e.to_string(),
            })?
            .get(0);
        if !installed {
            return Err(SchemaError::SchedulerMissing.into());
        }

        let job_name = Self::cron_job_name(&self.config);
        let command = format!("SELECT cleanup_expired_{}()", self.config.table_name);
        client
            .execute(
                "SELECT cron.schedule($1, $2, $3)",
                &[&job_name, &schedule, &command],
            )
            .await
            .map_err(|e| SchemaError::Setup {
                step: "cron.schedule".to_string(),
                reason: e.to_string(),
            })?;
        tracing::info!(job = %job_name, schedule, "scheduled expired-row sweep");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SchemaConfig {
        SchemaConfig::default()
    }

    #[test]
    fn test_valid_identifiers() {
        for ident in ["kv", "kv_store", "_private", "Table2", "a"] {
            assert!(SchemaManager::validate_identifier(ident).is_ok(), "{ident}");
        }
    }

    #[test]
    fn test_invalid_identifiers_rejected() {
        for ident in [
            "",
            "2table",
            "kv-store",
            "kv store",
            "kv;drop",
            "kv\"",
            "taño",
            "key; DROP TABLE users; --",
        ] {
            let err = SchemaManager::validate_identifier(ident).unwrap_err();
            assert!(
                matches!(err, SchemaError::InvalidIdentifier { .. }),
                "{ident}"
            );
        }
    }

    #[test]
    fn test_validate_covers_all_three_identifiers() {
        let mut bad = config();
        bad.key_column = "ke y".to_string();
        assert!(SchemaManager::validate(&bad).is_err());

        let mut bad = config();
        bad.value_column = "v;".to_string();
        assert!(SchemaManager::validate(&bad).is_err());

        assert!(SchemaManager::validate(&config()).is_ok());
    }

    #[test]
    fn test_table_ddl_shape() {
        let ddl = SchemaManager::table_ddl(&config());
        assert!(ddl.contains("CREATE TABLE IF NOT EXISTS nuvex_store"));
        assert!(ddl.contains("key VARCHAR(512) NOT NULL UNIQUE"));
        assert!(ddl.contains("value JSONB NOT NULL"));
        assert!(ddl.contains("expires_at TIMESTAMPTZ"));
        assert!(ddl.contains("updated_at TIMESTAMPTZ NOT NULL DEFAULT now()"));
    }

    #[test]
    fn test_expiry_index_is_partial() {
        let ddl = SchemaManager::expiry_index_ddl(&config());
        assert!(ddl.contains("WHERE expires_at IS NOT NULL"));
    }

    #[test]
    fn test_trigger_ddl_stamps_updated_at() {
        let ddl = SchemaManager::trigger_ddl(&config());
        assert_eq!(ddl.len(), 3);
        assert!(ddl[0].contains("NEW.updated_at = now()"));
        assert!(ddl[2].contains("BEFORE UPDATE ON nuvex_store"));
    }

    #[test]
    fn test_cleanup_function_returns_count() {
        let ddl = SchemaManager::cleanup_function_ddl(&config());
        assert!(ddl.contains("cleanup_expired_nuvex_store()"));
        assert!(ddl.contains("GET DIAGNOSTICS purged = ROW_COUNT"));
    }

    #[test]
    fn test_cron_job_name_is_per_table() {
        let mut other = config();
        other.table_name = "tenant_a".to_string();
        assert_eq!(SchemaManager::cron_job_name(&config()), "nuvex_cleanup_nuvex_store");
        assert_eq!(SchemaManager::cron_job_name(&other), "nuvex_cleanup_tenant_a");
    }

    #[test]
    fn test_custom_identifiers_flow_into_ddl() {
        let custom = SchemaConfig {
            table_name: "session_cache".to_string(),
            key_column: "session_id".to_string(),
            value_column: "payload".to_string(),
            ..config()
        };
        let ddl = SchemaManager::table_ddl(&custom);
        assert!(ddl.contains("session_cache"));
        assert!(ddl.contains("session_id VARCHAR(512)"));
        assert!(ddl.contains("payload JSONB"));
        let trigram = SchemaManager::trigram_index_ddl(&custom);
        assert!(trigram.contains("session_cache_session_id_trgm_idx"));
    }
}
