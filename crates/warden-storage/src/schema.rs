use rusqlite::Connection;

/// Idempotent schema creation plus additive migration, mirroring the
/// `PRAGMA table_info`-driven approach the teacher project uses so a
/// deployed database can gain columns across versions without a separate
/// migration runner.
pub fn ensure_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS chat_threads (
            id TEXT PRIMARY KEY,
            platform TEXT NOT NULL,
            external_chat_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(platform, external_chat_id)
        );

        CREATE TABLE IF NOT EXISTS chat_messages (
            id TEXT PRIMARY KEY,
            thread_id TEXT NOT NULL REFERENCES chat_threads(id),
            external_message_id TEXT,
            role TEXT NOT NULL,
            author_id TEXT,
            text TEXT,
            raw_payload TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_messages_thread_created
            ON chat_messages(thread_id, created_at DESC);

        CREATE TABLE IF NOT EXISTS message_artifacts (
            id TEXT PRIMARY KEY,
            message_id TEXT NOT NULL REFERENCES chat_messages(id),
            kind TEXT NOT NULL,
            status TEXT NOT NULL,
            attempt_count INTEGER NOT NULL DEFAULT 0,
            content TEXT NOT NULL DEFAULT '{}',
            error TEXT,
            uri TEXT,
            created_at TEXT NOT NULL,
            last_attempt_at TEXT,
            completed_at TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_artifacts_status
            ON message_artifacts(status, attempt_count);

        CREATE TABLE IF NOT EXISTS reactive_jobs (
            id TEXT PRIMARY KEY,
            thread_id TEXT NOT NULL REFERENCES chat_threads(id),
            trigger_message_id TEXT NOT NULL REFERENCES chat_messages(id),
            mode TEXT NOT NULL,
            status TEXT NOT NULL,
            payload TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            started_at TEXT,
            finished_at TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_jobs_status_created
            ON reactive_jobs(status, created_at);
        CREATE INDEX IF NOT EXISTS idx_jobs_thread_created
            ON reactive_jobs(thread_id, created_at);

        CREATE TABLE IF NOT EXISTS approvals (
            id TEXT PRIMARY KEY,
            thread_id TEXT NOT NULL REFERENCES chat_threads(id),
            job_id TEXT REFERENCES reactive_jobs(id),
            proposal_text TEXT NOT NULL,
            status TEXT NOT NULL,
            prompt_message_id TEXT,
            created_at TEXT NOT NULL,
            resolved_at TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_approvals_job ON approvals(job_id);
        CREATE INDEX IF NOT EXISTS idx_approvals_thread_status
            ON approvals(thread_id, status);

        CREATE TABLE IF NOT EXISTS token_ledger (
            id TEXT PRIMARY KEY,
            scope TEXT NOT NULL,
            provider TEXT NOT NULL,
            tokens_input INTEGER NOT NULL,
            tokens_output INTEGER NOT NULL,
            tokens_total INTEGER NOT NULL,
            meta TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_ledger_scope_created
            ON token_ledger(scope, created_at);

        CREATE TABLE IF NOT EXISTS agent_goals (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT NOT NULL,
            success_criteria TEXT NOT NULL,
            source TEXT NOT NULL,
            priority TEXT NOT NULL,
            status TEXT NOT NULL,
            total_tasks INTEGER NOT NULL DEFAULT 0,
            completed_tasks INTEGER NOT NULL DEFAULT 0,
            failed_tasks INTEGER NOT NULL DEFAULT 0,
            verified_by_master INTEGER NOT NULL DEFAULT 0,
            master_feedback TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT
        );

        CREATE TABLE IF NOT EXISTS agent_tasks (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT NOT NULL,
            priority TEXT NOT NULL,
            status TEXT NOT NULL,
            source TEXT NOT NULL,
            goal_criteria TEXT,
            attempts INTEGER NOT NULL DEFAULT 0,
            max_attempts INTEGER NOT NULL DEFAULT 3,
            last_result TEXT,
            parent_id TEXT REFERENCES agent_tasks(id),
            order_index INTEGER NOT NULL DEFAULT 0,
            depth INTEGER NOT NULL DEFAULT 0,
            goal_id TEXT REFERENCES agent_goals(id),
            created_at TEXT NOT NULL,
            started_at TEXT,
            completed_at TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_tasks_selection
            ON agent_tasks(status, depth, source, priority, created_at);
        CREATE INDEX IF NOT EXISTS idx_tasks_parent ON agent_tasks(parent_id);

        CREATE TABLE IF NOT EXISTS deployments (
            id TEXT PRIMARY KEY,
            sha TEXT NOT NULL,
            branch TEXT NOT NULL,
            status TEXT NOT NULL,
            started_at TEXT,
            finished_at TEXT,
            report TEXT
        );

        CREATE TABLE IF NOT EXISTS memory_entries (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            payload TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_memory_kind_created
            ON memory_entries(kind, created_at DESC);
        "#,
    )?;

    add_column_if_missing(conn, "message_artifacts", "completed_at", "TEXT")?;
    add_column_if_missing(conn, "agent_tasks", "goal_id", "TEXT")?;

    Ok(())
}

fn add_column_if_missing(
    conn: &Connection,
    table: &str,
    column: &str,
    sql_type: &str,
) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let existing: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .filter_map(Result::ok)
        .collect();
    if !existing.iter().any(|c| c == column) {
        conn.execute(
            &format!("ALTER TABLE {table} ADD COLUMN {column} {sql_type}"),
            [],
        )?;
    }
    Ok(())
}
