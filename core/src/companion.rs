//! Thin typed wrapper around the server-side companion extension's SQL
//! surface. The SQL fragments embedded in a `TableJob` are opaque and
//! never parsed here; this module only calls the companion's own
//! functions and views by name.

use tokio_postgres::Client;

use crate::error::{is_sqlstate, ReorgError, Result, SQLSTATE_INVALID_SCHEMA_NAME};
use crate::job::{IndexSpec, TableJob};

/// Result of `probe`: either the companion matches, or the database
/// should be skipped with a reason. Connection-level errors still
/// propagate as `Err`.
#[derive(Debug, PartialEq, Eq)]
pub enum ProbeOutcome {
    Ok,
    Skip(String),
}

/// Verifies the companion extension is installed and its reported
/// version matches the client's own `program-name program-version`
/// string. Never panics; either succeeds, returns a skip reason, or
/// escalates a connection-level error.
pub async fn probe(client: &Client, expected: &str) -> Result<ProbeOutcome> {
    let row = match client
        .query_opt("SELECT repack.version(), repack.version_sql()", &[])
        .await
    {
        Ok(row) => row,
        Err(err) => {
            if is_sqlstate(&err, SQLSTATE_INVALID_SCHEMA_NAME) {
                return Ok(ProbeOutcome::Skip("not installed".to_string()));
            }
            return Err(ReorgError::Database(err));
        }
    };

    let Some(row) = row else {
        return Ok(ProbeOutcome::Skip("not installed".to_string()));
    };

    let library_version: String = row.get(0);
    let extension_version: String = row.get(1);

    if library_version == expected && extension_version == expected {
        Ok(ProbeOutcome::Ok)
    } else {
        Ok(ProbeOutcome::Skip(format!(
            "version mismatch: client is {expected}, library is {library_version}, extension is {extension_version}"
        )))
    }
}

/// One row from the companion's `conflicted_triggers(oid)` helper: the
/// name of a trigger on the target that would conflict with the
/// reorganization trigger.
pub async fn conflicted_triggers(client: &Client, target_oid: u32) -> Result<Vec<String>> {
    let rows = client
        .query(
            "SELECT * FROM repack.conflicted_triggers($1::oid)",
            &[&(target_oid as i64)],
        )
        .await?;
    Ok(rows.iter().map(|r| r.get::<_, String>(0)).collect())
}

/// Invokes `repack_apply`, returning the number of log rows processed.
pub async fn apply_log(client: &Client, job: &TableJob, limit: i32) -> Result<i64> {
    let row = client
        .query_one(
            "SELECT repack.repack_apply($1, $2, $3, $4, $5, $6)",
            &[
                &job.sql_peek,
                &job.sql_insert,
                &job.sql_delete,
                &job.sql_update,
                &job.sql_pop,
                &limit,
            ],
        )
        .await?;
    Ok(row.get(0))
}

/// Atomically exchanges storage between the target and its shadow.
pub async fn swap(client: &Client, target_oid: u32) -> Result<()> {
    client
        .execute("SELECT repack.repack_swap($1::oid)", &[&(target_oid as i64)])
        .await?;
    Ok(())
}

/// Removes workspace objects (log table, trigger, auxiliary type) for a
/// target. Idempotent: a no-op if no workspace exists.
pub async fn drop_workspace(client: &Client, target_oid: u32) -> Result<()> {
    client
        .execute("SELECT repack.repack_drop($1::oid)", &[&(target_oid as i64)])
        .await?;
    Ok(())
}

pub async fn disable_autovacuum(client: &Client, relation: &str) -> Result<()> {
    client
        .execute("SELECT repack.disable_autovacuum($1::regclass)", &[&relation])
        .await?;
    Ok(())
}

/// Returns all indexes of the target, rebuild SQL pre-generated by the
/// companion's `repack_indexdef` helper. Invalid indexes are included in
/// the result with `is_valid = false` so the caller can emit a warning
/// and skip them.
pub async fn target_indexes(client: &Client, target_oid: u32) -> Result<Vec<IndexSpec>> {
    let rows = client
        .query(
            "SELECT indexrelid, indisvalid, \
                    repack.repack_indexdef(indexrelid, indrelid), \
                    pg_get_indexdef(indexrelid) \
             FROM pg_index WHERE indrelid = $1::oid",
            &[&(target_oid as i64)],
        )
        .await?;

    Ok(rows
        .into_iter()
        .map(|row| IndexSpec {
            index_oid: row.get::<_, i64>(0) as u32,
            is_valid: row.get(1),
            rebuild_sql: row.get(2),
            original_definition: row.get(3),
        })
        .collect())
}

/// Captures the snapshot vxid list from `pg_locks`. The bgwriter
/// sentinel `('1/1', '-1/0')` is excluded by the query text itself.
pub async fn snapshot_vxids(client: &Client) -> Result<Vec<String>> {
    let rows = client
        .query(
            "SELECT virtualtransaction FROM pg_locks \
             WHERE locktype = 'virtualxid' AND pid <> pg_backend_pid() \
             AND (virtualxid, virtualtransaction) <> ('1/1', '-1/0')",
            &[],
        )
        .await?;
    Ok(rows.iter().map(|r| r.get::<_, String>(0)).collect())
}

/// Returns the subset of `vxids` that are still held by a live backend.
pub async fn alive_vxids(client: &Client, vxids: &[String]) -> Result<Vec<(String, i32)>> {
    if vxids.is_empty() {
        return Ok(Vec::new());
    }
    let rows = client
        .query(
            "SELECT virtualtransaction, pid FROM pg_locks \
             WHERE locktype = 'virtualxid' AND pid <> pg_backend_pid() \
             AND virtualtransaction = ANY($1)",
            &[&vxids],
        )
        .await?;
    Ok(rows
        .iter()
        .map(|r| (r.get::<_, String>(0), r.get::<_, i32>(1)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_outcome_equality_for_matching_versions() {
        assert_eq!(ProbeOutcome::Ok, ProbeOutcome::Ok);
        assert_ne!(ProbeOutcome::Ok, ProbeOutcome::Skip("not installed".into()));
    }
}
