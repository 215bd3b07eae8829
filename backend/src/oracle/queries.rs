//! # Introspection SQL
//!
//! The fixed, read-only catalog of statements run against the target.
//! Every statement returns raw counters (bytes, microseconds, counts);
//! rounding and unit conversion happen in the collector so they can be
//! tested without a database.

/// Columns shared by every session query, in `RawSession` field order.
macro_rules! session_select {
    ($filter:literal, $order:literal) => {
        concat!(
            "SELECT s.sid, s.serial#, s.username, s.schemaname, s.osuser, s.machine, ",
            "s.program, s.status, s.sql_id, sq.sql_text, s.logon_time, s.last_call_et, ",
            "s.blocking_session, s.wait_class, s.event, s.seconds_in_wait ",
            "FROM v$session s ",
            "LEFT JOIN (SELECT sql_id, MAX(sql_text) AS sql_text FROM v$sql GROUP BY sql_id) sq ",
            "ON s.sql_id = sq.sql_id ",
            "WHERE s.type = 'USER' AND s.username IS NOT NULL ",
            $filter,
            " ORDER BY ",
            $order
        )
    };
}

pub const ACTIVE_SESSIONS: &str =
    session_select!("AND s.status = 'ACTIVE'", "s.last_call_et DESC, s.sid");

pub const ALL_SESSIONS: &str = session_select!("", "s.logon_time DESC, s.sid");

/// Bind `:1` is the schema name.
pub const SESSIONS_BY_SCHEMA: &str =
    session_select!("AND s.schemaname = :1", "s.last_call_et DESC, s.sid");

pub const TABLESPACES: &str = "\
SELECT df.tablespace_name, df.total_bytes, NVL(fs.free_bytes, 0), ts.status, ts.contents, df.datafile_count \
FROM (SELECT tablespace_name, SUM(bytes) AS total_bytes, COUNT(*) AS datafile_count \
      FROM dba_data_files GROUP BY tablespace_name) df \
LEFT JOIN (SELECT tablespace_name, SUM(bytes) AS free_bytes \
      FROM dba_free_space GROUP BY tablespace_name) fs \
  ON df.tablespace_name = fs.tablespace_name \
JOIN dba_tablespaces ts ON df.tablespace_name = ts.tablespace_name";

/// Bind `:1` is the row limit.
pub const TOP_SQL_BY_ELAPSED: &str = "\
SELECT sql_id, SUBSTR(sql_text, 1, 4000), parsing_schema_name, executions, elapsed_time, cpu_time, \
       disk_reads, buffer_gets, rows_processed, first_load_time, last_active_time \
FROM v$sql \
WHERE executions > 0 AND parsing_schema_name IS NOT NULL \
ORDER BY elapsed_time DESC \
FETCH FIRST :1 ROWS ONLY";

/// Bind `:1` is the row limit.
pub const TOP_SQL_BY_CPU: &str = "\
SELECT sql_id, SUBSTR(sql_text, 1, 4000), parsing_schema_name, executions, elapsed_time, cpu_time, \
       disk_reads, buffer_gets, rows_processed, first_load_time, last_active_time \
FROM v$sql \
WHERE executions > 0 AND parsing_schema_name IS NOT NULL \
ORDER BY cpu_time DESC \
FETCH FIRST :1 ROWS ONLY";

/// `SYSDATE` is read alongside `startup_time` so uptime is computed in
/// the target's own clock.
pub const INSTANCE: &str = "\
SELECT instance_name, host_name, version, startup_time, status, database_status, instance_role, SYSDATE \
FROM v$instance";

pub const DATABASE_SIZE: &str = "SELECT NVL(SUM(bytes), 0) FROM dba_data_files";

pub const OBJECT_INVENTORY: &str = "\
SELECT owner, object_type, COUNT(*) \
FROM dba_objects \
GROUP BY owner, object_type";

pub const INVALID_OBJECTS: &str = "\
SELECT owner, object_name, object_type, status, last_ddl_time, created \
FROM dba_objects \
WHERE status = 'INVALID' \
ORDER BY owner, object_type, object_name";

pub const PING: &str = "SELECT 1 FROM dual";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_queries_share_projection() {
        let projection = "SELECT s.sid, s.serial#, s.username";
        for q in [ACTIVE_SESSIONS, ALL_SESSIONS, SESSIONS_BY_SCHEMA] {
            assert!(q.starts_with(projection));
            assert!(q.contains("s.type = 'USER'"));
        }
        assert!(ACTIVE_SESSIONS.contains("s.status = 'ACTIVE'"));
        assert!(SESSIONS_BY_SCHEMA.contains(":1"));
        assert!(!ALL_SESSIONS.contains(":1"));
    }

    #[test]
    fn test_catalog_is_read_only() {
        let all = [
            ACTIVE_SESSIONS,
            ALL_SESSIONS,
            SESSIONS_BY_SCHEMA,
            TABLESPACES,
            TOP_SQL_BY_ELAPSED,
            TOP_SQL_BY_CPU,
            INSTANCE,
            DATABASE_SIZE,
            OBJECT_INVENTORY,
            INVALID_OBJECTS,
            PING,
        ];
        for q in all {
            let upper = q.to_uppercase();
            assert!(upper.trim_start().starts_with("SELECT"), "{}", q);
            for verb in ["INSERT ", "UPDATE ", "DELETE ", "MERGE ", "ALTER ", "DROP "] {
                assert!(!upper.contains(verb), "{} in {}", verb, q);
            }
        }
    }
}
