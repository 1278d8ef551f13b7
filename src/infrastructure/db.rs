use sea_orm::{ConnectionTrait, Database, DatabaseConnection, DbErr, Statement};

pub async fn init_db(database_url: &str) -> Result<DatabaseConnection, DbErr> {
    let db = Database::connect(database_url).await?;

    // Run migrations manually (simple SQL)
    run_migrations(&db).await?;

    Ok(db)
}

async fn execute(db: &DatabaseConnection, sql: &str) -> Result<(), DbErr> {
    db.execute(Statement::from_string(
        db.get_database_backend(),
        sql.to_owned(),
    ))
    .await?;
    Ok(())
}

async fn run_migrations(db: &DatabaseConnection) -> Result<(), DbErr> {
    // Create users table
    execute(
        db,
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL UNIQUE,
            role TEXT NOT NULL DEFAULT 'staff',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .await?;

    // Create patients table (soft-deletable)
    execute(
        db,
        r#"
        CREATE TABLE IF NOT EXISTS patients (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            medical_record_number TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            gender TEXT,
            birth_date TEXT,
            phone TEXT,
            address TEXT,
            status TEXT NOT NULL DEFAULT 'active',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            deleted_at TEXT
        )
        "#,
    )
    .await?;

    execute(
        db,
        "CREATE INDEX IF NOT EXISTS idx_patients_status ON patients(status)",
    )
    .await?;

    // Create procedures (tindakan) table
    execute(
        db,
        r#"
        CREATE TABLE IF NOT EXISTS procedures (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            patient_id INTEGER NOT NULL,
            procedure_code TEXT NOT NULL,
            name TEXT NOT NULL,
            performed_at TEXT,
            tariff REAL NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'pending',
            notes TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY (patient_id) REFERENCES patients(id) ON DELETE CASCADE
        )
        "#,
    )
    .await?;

    execute(
        db,
        "CREATE INDEX IF NOT EXISTS idx_procedures_patient_id ON procedures(patient_id)",
    )
    .await?;

    execute(
        db,
        "CREATE INDEX IF NOT EXISTS idx_procedures_status ON procedures(status)",
    )
    .await?;

    // Create bulk_operations table
    execute(
        db,
        r#"
        CREATE TABLE IF NOT EXISTS bulk_operations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            operation_type TEXT NOT NULL, -- 'create', 'update', 'delete', 'export'
            target_model TEXT NOT NULL,
            filters TEXT NOT NULL DEFAULT '[]', -- JSON array of predicates
            payload TEXT NOT NULL DEFAULT '{}', -- JSON payload
            status TEXT NOT NULL DEFAULT 'pending',
            total_records INTEGER NOT NULL DEFAULT 0 CHECK (total_records >= 0),
            processed_records INTEGER NOT NULL DEFAULT 0 CHECK (processed_records >= 0),
            failed_records INTEGER NOT NULL DEFAULT 0 CHECK (failed_records >= 0),
            error_message TEXT,
            file_path TEXT,
            owner_id INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            started_at TEXT,
            completed_at TEXT,
            FOREIGN KEY (owner_id) REFERENCES users(id)
        )
        "#,
    )
    .await?;

    execute(
        db,
        "CREATE INDEX IF NOT EXISTS idx_bulk_operations_status ON bulk_operations(status)",
    )
    .await?;

    execute(
        db,
        "CREATE INDEX IF NOT EXISTS idx_bulk_operations_owner_id ON bulk_operations(owner_id)",
    )
    .await?;

    Ok(())
}
