use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id              TEXT PRIMARY KEY,
            email           TEXT NOT NULL UNIQUE COLLATE NOCASE,
            password_hash   TEXT,
            role            TEXT NOT NULL DEFAULT 'client' CHECK (role IN ('client', 'admin')),
            google_id       TEXT UNIQUE,
            name            TEXT,
            company         TEXT,
            phone           TEXT,
            created_at      TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS subscriptions (
            id              TEXT PRIMARY KEY,
            user_id         TEXT NOT NULL REFERENCES users(id),
            plan            TEXT NOT NULL,
            billing_cycle   TEXT NOT NULL CHECK (billing_cycle IN ('monthly', 'yearly')),
            status          TEXT NOT NULL DEFAULT 'pending'
                            CHECK (status IN ('pending', 'active', 'rejected', 'cancelled', 'extended')),
            start_date      TEXT,
            end_date        TEXT,
            project_id      TEXT,
            created_at      TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_subscriptions_user
            ON subscriptions(user_id, created_at);

        CREATE TABLE IF NOT EXISTS projects (
            id              TEXT PRIMARY KEY,
            owner_id        TEXT NOT NULL REFERENCES users(id),
            plan            TEXT NOT NULL,
            status          TEXT NOT NULL DEFAULT 'pending'
                            CHECK (status IN ('pending', 'in-progress', 'completed', 'on-hold', 'cancelled')),
            notes           TEXT,
            subscription_id TEXT UNIQUE REFERENCES subscriptions(id),
            created_at      TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_projects_owner
            ON projects(owner_id, created_at);

        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY,
            name            TEXT NOT NULL,
            email           TEXT NOT NULL,
            phone           TEXT,
            company         TEXT,
            service         TEXT,
            content         TEXT NOT NULL,
            status          TEXT NOT NULL DEFAULT 'unread'
                            CHECK (status IN ('unread', 'read', 'archived')),
            ip_address      TEXT,
            user_agent      TEXT,
            created_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_messages_status
            ON messages(status, created_at);

        -- Targeted rows use is_read; broadcast rows keep a JSON array of reader ids.
        CREATE TABLE IF NOT EXISTS notifications (
            id              TEXT PRIMARY KEY,
            title           TEXT NOT NULL,
            body            TEXT NOT NULL,
            target          TEXT NOT NULL CHECK (target IN ('user', 'all')),
            user_id         TEXT REFERENCES users(id),
            is_read         INTEGER NOT NULL DEFAULT 0,
            read_by         TEXT NOT NULL DEFAULT '[]',
            created_at      TEXT NOT NULL DEFAULT (datetime('now')),
            CHECK ((target = 'user') = (user_id IS NOT NULL))
        );

        CREATE INDEX IF NOT EXISTS idx_notifications_user
            ON notifications(user_id, created_at);

        CREATE TABLE IF NOT EXISTS audit_logs (
            id              TEXT PRIMARY KEY,
            actor_id        TEXT,
            action          TEXT NOT NULL,
            detail          TEXT NOT NULL DEFAULT '{}',
            ip_address      TEXT,
            created_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_audit_logs_action
            ON audit_logs(action, created_at);

        CREATE TRIGGER IF NOT EXISTS audit_logs_no_update
            BEFORE UPDATE ON audit_logs
        BEGIN
            SELECT RAISE(ABORT, 'audit log is append-only');
        END;

        CREATE TRIGGER IF NOT EXISTS audit_logs_no_delete
            BEFORE DELETE ON audit_logs
        BEGIN
            SELECT RAISE(ABORT, 'audit log is append-only');
        END;

        CREATE TABLE IF NOT EXISTS signup_progress (
            email           TEXT PRIMARY KEY COLLATE NOCASE,
            step            INTEGER NOT NULL,
            data            TEXT NOT NULL,
            updated_at      TEXT NOT NULL,
            expires_at      TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS tickets (
            id              TEXT PRIMARY KEY,
            user_id         TEXT NOT NULL REFERENCES users(id),
            subject         TEXT NOT NULL,
            message         TEXT NOT NULL,
            priority        TEXT NOT NULL DEFAULT 'medium'
                            CHECK (priority IN ('low', 'medium', 'high', 'urgent')),
            status          TEXT NOT NULL DEFAULT 'open'
                            CHECK (status IN ('open', 'answered', 'closed')),
            created_at      TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_tickets_user
            ON tickets(user_id, created_at);

        CREATE TABLE IF NOT EXISTS ticket_responses (
            id              TEXT PRIMARY KEY,
            ticket_id       TEXT NOT NULL REFERENCES tickets(id) ON DELETE CASCADE,
            sender_role     TEXT NOT NULL CHECK (sender_role IN ('client', 'admin')),
            sender_id       TEXT NOT NULL REFERENCES users(id),
            message         TEXT NOT NULL,
            created_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_ticket_responses_ticket
            ON ticket_responses(ticket_id, created_at);

        CREATE TABLE IF NOT EXISTS invoices (
            id              TEXT PRIMARY KEY,
            user_id         TEXT NOT NULL REFERENCES users(id),
            reference       TEXT NOT NULL UNIQUE,
            amount_cents    INTEGER NOT NULL DEFAULT 0 CHECK (amount_cents >= 0),
            currency        TEXT NOT NULL DEFAULT 'USD',
            due_date        TEXT,
            description     TEXT NOT NULL,
            status          TEXT NOT NULL DEFAULT 'requested'
                            CHECK (status IN ('requested', 'sent', 'Paid', 'cancelled')),
            paid_at         TEXT,
            created_at      TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_invoices_user
            ON invoices(user_id, created_at);

        CREATE TRIGGER IF NOT EXISTS invoices_paid_no_delete
            BEFORE DELETE ON invoices
            WHEN OLD.status = 'Paid'
        BEGIN
            SELECT RAISE(ABORT, 'paid invoices cannot be deleted');
        END;
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
