//! 内置诊断查询目录

use common::models::QueryNode;

const PG_ACTIVE_CONNECTIONS: &str = "SELECT pid, usename, application_name, client_addr, state, query \
FROM pg_stat_activity WHERE state != 'idle'";

const PG_BLOCKED_QUERIES: &str = "SELECT blocked_locks.pid AS blocked_pid, \
blocked_activity.usename AS blocked_user, \
blocking_locks.pid AS blocking_pid, \
blocking_activity.usename AS blocking_user, \
blocked_activity.query AS blocked_statement, \
blocking_activity.query AS current_statement_in_blocking_process \
FROM pg_catalog.pg_locks blocked_locks \
JOIN pg_catalog.pg_stat_activity blocked_activity ON blocked_activity.pid = blocked_locks.pid \
JOIN pg_catalog.pg_locks blocking_locks ON blocking_locks.locktype = blocked_locks.locktype \
AND blocking_locks.database IS NOT DISTINCT FROM blocked_locks.database \
AND blocking_locks.relation IS NOT DISTINCT FROM blocked_locks.relation \
AND blocking_locks.page IS NOT DISTINCT FROM blocked_locks.page \
AND blocking_locks.tuple IS NOT DISTINCT FROM blocked_locks.tuple \
AND blocking_locks.virtualxid IS NOT DISTINCT FROM blocked_locks.virtualxid \
AND blocking_locks.transactionid IS NOT DISTINCT FROM blocked_locks.transactionid \
AND blocking_locks.classid IS NOT DISTINCT FROM blocked_locks.classid \
AND blocking_locks.objid IS NOT DISTINCT FROM blocked_locks.objid \
AND blocking_locks.objsubid IS NOT DISTINCT FROM blocked_locks.objsubid \
AND blocking_locks.pid != blocked_locks.pid \
JOIN pg_catalog.pg_stat_activity blocking_activity ON blocking_activity.pid = blocking_locks.pid \
WHERE NOT blocked_locks.granted";

const PG_LONG_RUNNING: &str = "SELECT pid, now() - pg_stat_activity.query_start AS duration, query \
FROM pg_stat_activity WHERE (now() - pg_stat_activity.query_start) > interval '1 second'";

const H2_SESSIONS: &str = "SELECT * FROM information_schema.sessions";

/// 构建诊断查询树（顶层为按数据库分组的文件夹）
pub fn diagnostics() -> Vec<QueryNode> {
    vec![
        QueryNode::folder(
            "postgres-diagnostics",
            "PostgreSQL Diagnostics",
            vec![
                QueryNode::query("pg-active-connections", "Active Connections", PG_ACTIVE_CONNECTIONS),
                QueryNode::query("pg-blocked-queries", "Blocked Queries", PG_BLOCKED_QUERIES),
                QueryNode::query("pg-long-running", "Long Running Queries (>1s)", PG_LONG_RUNNING),
            ],
        ),
        QueryNode::folder(
            "h2-diagnostics",
            "H2 Diagnostics",
            vec![QueryNode::query("h2-sessions", "Sessions", H2_SESSIONS)],
        ),
    ]
}

/// 在整棵树中按 ID 查找节点
pub fn find<'a>(roots: &'a [QueryNode], id: &str) -> Option<&'a QueryNode> {
    roots.iter().find_map(|node| node.find(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::models::QueryNodeType;
    use std::collections::HashSet;

    #[test]
    fn ids_are_unique() {
        fn collect<'a>(nodes: &'a [QueryNode], ids: &mut Vec<&'a str>) {
            for node in nodes {
                ids.push(&node.id);
                collect(&node.children, ids);
            }
        }
        let roots = diagnostics();
        let mut ids = Vec::new();
        collect(&roots, &mut ids);
        let unique: HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());
    }

    #[test]
    fn folders_hold_queries_only() {
        for folder in diagnostics() {
            assert_eq!(folder.node_type, QueryNodeType::Folder);
            assert!(folder.query.is_none());
            assert!(folder
                .children
                .iter()
                .all(|q| q.node_type == QueryNodeType::Query && q.query.is_some()));
        }
    }

    #[test]
    fn find_resolves_nested_query() {
        let roots = diagnostics();
        let node = find(&roots, "pg-long-running").unwrap();
        assert!(node.query.as_deref().unwrap().contains("interval '1 second'"));
        assert!(find(&roots, "unknown").is_none());
    }
}
