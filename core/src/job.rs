use std::fmt;

use crate::error::{ReorgError, Result};

/// How the shadow table's `CREATE TABLE ... AS SELECT` is ordered.
///
/// Replaces the three string branches of the original tool (clustered /
/// vacuum-full / explicit order) with a closed enum so the orchestrator
/// cannot construct an inconsistent combination (e.g. vacuum-full with a
/// clustering key requirement).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// No `--order-by`, no `--no-order`: require and use the table's
    /// clustering key.
    Clustered,
    /// `--no-order`: rebuild without reordering ("vacuum full" mode).
    VacuumFull,
    /// `--order-by=<cols>`: use the user-supplied ORDER BY expression.
    UserOrder(String),
}

impl Mode {
    pub fn requires_clustering_key(&self) -> bool {
        matches!(self, Mode::Clustered)
    }
}

/// One reorganization task: a fully materialized row from the companion
/// extension's `tables` view, plus identifiers needed to drive the
/// protocol. Created by the enumerator, consumed once by the orchestrator.
#[derive(Debug, Clone)]
pub struct TableJob {
    /// Schema-qualified target name, e.g. `public.orders`.
    pub target_name: String,
    pub target_oid: u32,
    pub target_toast: Option<u32>,
    pub target_toast_index: Option<u32>,
    /// Required: a job with `pkid == 0` must never reach the orchestrator.
    pub pkid: u32,
    pub ckid: Option<u32>,

    pub create_pktype: String,
    pub create_log: String,
    pub create_trigger: String,
    pub enable_trigger: String,
    /// Post-processed by the enumerator according to `Mode` (ORDER BY
    /// appended or left verbatim); see `job::finalize_create_table`.
    pub create_table: String,
    pub drop_columns: Option<String>,
    pub delete_log: String,
    pub lock_table: String,

    pub sql_peek: String,
    pub sql_insert: String,
    pub sql_delete: String,
    pub sql_update: String,
    pub sql_pop: String,
}

impl TableJob {
    /// Hard error per the data model invariant: a zero PK OID must never
    /// be processed.
    pub fn has_primary_key(&self) -> bool {
        self.pkid != 0
    }

    pub fn has_clustering_key(&self) -> bool {
        self.ckid.is_some()
    }

    pub fn log_table_name(&self) -> String {
        format!("repack.log_{}", self.target_oid)
    }

    pub fn table_table_name(&self) -> String {
        format!("repack.table_{}", self.target_oid)
    }
}

impl fmt::Display for TableJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (oid={})", self.target_name, self.target_oid)
    }
}

/// Appends the mode-specific ORDER BY clause to the raw `create_table`
/// fragment returned by the companion extension. This is the *only*
/// client-side SQL composition the protocol performs; every other
/// fragment is opaque text.
///
/// `Mode::Clustered` requires a clustering-key fragment; a non-null
/// `ckid` with no `ckey` text is a hard error for that table rather than
/// a panic, since a corrupt or partially-dropped clustering key on the
/// companion side is reachable data, not a programming bug.
pub fn finalize_create_table(
    table_name: &str,
    raw_create_table: &str,
    mode: &Mode,
    clustering_fragment: Option<&str>,
) -> Result<String> {
    match mode {
        Mode::Clustered => {
            let order = clustering_fragment.ok_or_else(|| ReorgError::Precondition {
                table: table_name.to_string(),
                reason: "has a clustering key id but no clustering key definition".to_string(),
            })?;
            Ok(format!("{raw_create_table} ORDER BY {order}"))
        }
        Mode::VacuumFull => Ok(raw_create_table.to_string()),
        Mode::UserOrder(cols) => Ok(format!("{raw_create_table} ORDER BY {cols}")),
    }
}

/// Per-index rebuild descriptor, produced by the shadow builder's index
/// query and consumed immediately during the index-rebuild substep.
#[derive(Debug, Clone)]
pub struct IndexSpec {
    pub index_oid: u32,
    pub rebuild_sql: String,
    pub is_valid: bool,
    pub original_definition: String,
}

/// Outcome of processing one database under `--all` mode.
#[derive(Debug)]
pub enum DatabaseOutcome {
    Completed { database: String, tables_done: usize },
    Skipped { database: String, reason: String },
    Failed { database: String, error: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_with(pkid: u32, ckid: Option<u32>) -> TableJob {
        TableJob {
            target_name: "public.t".into(),
            target_oid: 42,
            target_toast: None,
            target_toast_index: None,
            pkid,
            ckid,
            create_pktype: String::new(),
            create_log: String::new(),
            create_trigger: String::new(),
            enable_trigger: String::new(),
            create_table: "CREATE TABLE repack.table_42 AS SELECT * FROM ONLY public.t".into(),
            drop_columns: None,
            delete_log: String::new(),
            lock_table: String::new(),
            sql_peek: String::new(),
            sql_insert: String::new(),
            sql_delete: String::new(),
            sql_update: String::new(),
            sql_pop: String::new(),
        }
    }

    #[test]
    fn zero_pk_oid_is_rejected() {
        let job = job_with(0, None);
        assert!(!job.has_primary_key());
    }

    #[test]
    fn clustered_mode_appends_clustering_fragment() {
        let job = job_with(10, Some(20));
        let sql = finalize_create_table(&job.target_name, &job.create_table, &Mode::Clustered, Some("k")).unwrap();
        assert_eq!(sql, format!("{} ORDER BY k", job.create_table));
    }

    #[test]
    fn clustered_mode_without_clustering_fragment_is_a_precondition_error() {
        let job = job_with(10, Some(20));
        let err = finalize_create_table(&job.target_name, &job.create_table, &Mode::Clustered, None).unwrap_err();
        assert!(matches!(err, ReorgError::Precondition { table, .. } if table == job.target_name));
    }

    #[test]
    fn vacuum_full_mode_is_verbatim() {
        let job = job_with(10, None);
        let sql = finalize_create_table(&job.target_name, &job.create_table, &Mode::VacuumFull, None).unwrap();
        assert_eq!(sql, job.create_table);
    }

    #[test]
    fn user_order_mode_appends_user_columns() {
        let job = job_with(10, None);
        let sql =
            finalize_create_table(&job.target_name, &job.create_table, &Mode::UserOrder("a, b".into()), None)
                .unwrap();
        assert_eq!(sql, format!("{} ORDER BY a, b", job.create_table));
    }

    #[test]
    fn workspace_object_names_are_keyed_by_oid() {
        let job = job_with(10, None);
        assert_eq!(job.log_table_name(), "repack.log_42");
        assert_eq!(job.table_table_name(), "repack.table_42");
    }
}
