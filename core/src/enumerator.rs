//! Target enumerator: selects rows from the companion extension's
//! `tables` view and materializes each into a `TableJob`, finalizing the
//! mode-specific `create_table` fragment.

use tokio_postgres::Client;

use crate::error::Result;
use crate::job::{finalize_create_table, Mode, TableJob};

/// Lists the candidate tables for `mode`. When `table_filter` is set, the
/// query restricts to that one table's regclass; otherwise it requires a
/// non-null primary-key descriptor, and additionally a non-null
/// clustering-key descriptor unless `mode` tolerates its absence.
pub async fn enumerate_targets(client: &Client, table_filter: Option<&str>, mode: &Mode) -> Result<Vec<TableJob>> {
    let rows = match table_filter {
        Some(table) => {
            client
                .query(
                    "SELECT target_name, target_oid, target_toast, target_tidx, pkid, ckid, \
                            ckey, create_pktype, create_log, create_trigger, enable_trigger, \
                            create_table, drop_columns, delete_log, lock_table, \
                            sql_peek, sql_insert, sql_delete, sql_update, sql_pop \
                     FROM repack.tables WHERE target_name = $1::regclass::text",
                    &[&table],
                )
                .await?
        }
        None => {
            let require_ck = mode.requires_clustering_key();
            client
                .query(
                    "SELECT target_name, target_oid, target_toast, target_tidx, pkid, ckid, \
                            ckey, create_pktype, create_log, create_trigger, enable_trigger, \
                            create_table, drop_columns, delete_log, lock_table, \
                            sql_peek, sql_insert, sql_delete, sql_update, sql_pop \
                     FROM repack.tables \
                     WHERE pkid IS NOT NULL AND ($1 = false OR ckid IS NOT NULL)",
                    &[&require_ck],
                )
                .await?
        }
    };

    let mut jobs = Vec::with_capacity(rows.len());
    for row in rows {
        let raw_create_table: String = row.get("create_table");
        let ckid: Option<i64> = row.get("ckid");
        let ckey: Option<String> = row.get("ckey");
        let target_name: String = row.get("target_name");

        let create_table = finalize_create_table(&target_name, &raw_create_table, mode, ckey.as_deref())?;

        jobs.push(TableJob {
            target_name,
            target_oid: row.get::<_, i64>("target_oid") as u32,
            target_toast: row.get::<_, Option<i64>>("target_toast").map(|v| v as u32),
            target_toast_index: row.get::<_, Option<i64>>("target_tidx").map(|v| v as u32),
            pkid: row.get::<_, i64>("pkid") as u32,
            ckid: ckid.map(|v| v as u32),
            create_pktype: row.get("create_pktype"),
            create_log: row.get("create_log"),
            create_trigger: row.get("create_trigger"),
            enable_trigger: row.get("enable_trigger"),
            create_table,
            drop_columns: row.get("drop_columns"),
            delete_log: row.get("delete_log"),
            lock_table: row.get("lock_table"),
            sql_peek: row.get("sql_peek"),
            sql_insert: row.get("sql_insert"),
            sql_delete: row.get("sql_delete"),
            sql_update: row.get("sql_update"),
            sql_pop: row.get("sql_pop"),
        });
    }

    Ok(jobs)
}
