//! Schema definitions and migration planning
//!
//! The three logical stores (catalog items, transactions, key/value settings)
//! are described here once; the adapters execute them. Planning is pure so
//! that idempotency can be checked without a server: a plan computed against
//! an up-to-date schema is always empty.

use serde::Serialize;

/// Logical table / collection names
pub const PRODUCTS: &str = "products";
pub const TRANSACTIONS: &str = "transactions";
pub const SETTINGS: &str = "settings";

pub const TABLES: [&str; 3] = [PRODUCTS, TRANSACTIONS, SETTINGS];

/// SQL dialect of a relational backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    MySql,
    Postgres,
}

/// `CREATE TABLE IF NOT EXISTS` statements, in dependency order
pub fn create_table_statements(dialect: Dialect) -> [(&'static str, &'static str); 3] {
    match dialect {
        Dialect::MySql => [
            (
                PRODUCTS,
                r#"CREATE TABLE IF NOT EXISTS products (
    id INT AUTO_INCREMENT PRIMARY KEY,
    user_id VARCHAR(64) NOT NULL,
    name VARCHAR(255) NOT NULL,
    sku VARCHAR(64) NULL,
    category VARCHAR(100) NULL,
    description TEXT NULL,
    price DECIMAL(12,2) NOT NULL DEFAULT 0,
    cost DECIMAL(12,2) NOT NULL DEFAULT 0,
    quantity INT NOT NULL DEFAULT 0,
    image_url LONGTEXT NULL,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP
) ENGINE=InnoDB"#,
            ),
            (
                TRANSACTIONS,
                r#"CREATE TABLE IF NOT EXISTS transactions (
    id INT AUTO_INCREMENT PRIMARY KEY,
    user_id VARCHAR(64) NOT NULL,
    product_id INT NOT NULL,
    transaction_type VARCHAR(16) NOT NULL,
    quantity INT NOT NULL,
    unit_price DECIMAL(12,2) NOT NULL DEFAULT 0,
    total DECIMAL(12,2) NOT NULL DEFAULT 0,
    notes TEXT NULL,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
) ENGINE=InnoDB"#,
            ),
            (
                SETTINGS,
                r#"CREATE TABLE IF NOT EXISTS settings (
    id INT AUTO_INCREMENT PRIMARY KEY,
    setting_key VARCHAR(191) NOT NULL,
    setting_value LONGTEXT NULL,
    is_sensitive BOOLEAN NOT NULL DEFAULT FALSE,
    updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP
) ENGINE=InnoDB"#,
            ),
        ],
        Dialect::Postgres => [
            (
                PRODUCTS,
                r#"CREATE TABLE IF NOT EXISTS products (
    id SERIAL PRIMARY KEY,
    user_id VARCHAR(64) NOT NULL,
    name VARCHAR(255) NOT NULL,
    sku VARCHAR(64) NULL,
    category VARCHAR(100) NULL,
    description TEXT NULL,
    price NUMERIC(12,2) NOT NULL DEFAULT 0,
    cost NUMERIC(12,2) NOT NULL DEFAULT 0,
    quantity INTEGER NOT NULL DEFAULT 0,
    image_url TEXT NULL,
    created_at TIMESTAMPTZ DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMPTZ DEFAULT CURRENT_TIMESTAMP
)"#,
            ),
            (
                TRANSACTIONS,
                r#"CREATE TABLE IF NOT EXISTS transactions (
    id SERIAL PRIMARY KEY,
    user_id VARCHAR(64) NOT NULL,
    product_id INTEGER NOT NULL,
    transaction_type VARCHAR(16) NOT NULL,
    quantity INTEGER NOT NULL,
    unit_price NUMERIC(12,2) NOT NULL DEFAULT 0,
    total NUMERIC(12,2) NOT NULL DEFAULT 0,
    notes TEXT NULL,
    created_at TIMESTAMPTZ DEFAULT CURRENT_TIMESTAMP
)"#,
            ),
            (
                SETTINGS,
                r#"CREATE TABLE IF NOT EXISTS settings (
    id SERIAL PRIMARY KEY,
    setting_key VARCHAR(191) NOT NULL,
    setting_value TEXT NULL,
    is_sensitive BOOLEAN NOT NULL DEFAULT FALSE,
    updated_at TIMESTAMPTZ DEFAULT CURRENT_TIMESTAMP
)"#,
            ),
        ],
    }
}

/// Secondary index on a relational table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: &'static str,
    pub table: &'static str,
    pub columns: &'static [&'static str],
    pub unique: bool,
}

pub const INDEXES: [IndexSpec; 3] = [
    IndexSpec {
        name: "uq_products_user_name",
        table: PRODUCTS,
        columns: &["user_id", "name"],
        unique: true,
    },
    IndexSpec {
        name: "idx_transactions_user_product",
        table: TRANSACTIONS,
        columns: &["user_id", "product_id"],
        unique: false,
    },
    IndexSpec {
        name: "uq_settings_key",
        table: SETTINGS,
        columns: &["setting_key"],
        unique: true,
    },
];

impl IndexSpec {
    /// Creation statement; callers only issue it for indexes that are missing
    pub fn create_sql(&self, dialect: Dialect) -> String {
        let unique = if self.unique { "UNIQUE " } else { "" };
        let if_not_exists = match dialect {
            Dialect::Postgres => "IF NOT EXISTS ",
            Dialect::MySql => "",
        };
        format!(
            "CREATE {}INDEX {}{} ON {} ({})",
            unique,
            if_not_exists,
            self.name,
            self.table,
            self.columns.join(", ")
        )
    }
}

/// One column as reported by `information_schema.columns`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMeta {
    pub table: String,
    pub column: String,
    /// Lowercased `data_type`
    pub data_type: String,
}

impl ColumnMeta {
    pub fn new(table: &str, column: &str, data_type: &str) -> Self {
        Self {
            table: table.to_string(),
            column: column.to_string(),
            data_type: data_type.to_lowercase(),
        }
    }
}

/// Column introduced after the first schema version
struct AddedColumn {
    table: &'static str,
    column: &'static str,
    definition: &'static str,
}

const ADDED_COLUMNS: [AddedColumn; 3] = [
    AddedColumn {
        table: PRODUCTS,
        column: "category",
        definition: "VARCHAR(100) NULL",
    },
    AddedColumn {
        table: PRODUCTS,
        column: "description",
        definition: "TEXT NULL",
    },
    AddedColumn {
        table: SETTINGS,
        column: "is_sensitive",
        definition: "BOOLEAN NOT NULL DEFAULT FALSE",
    },
];

/// Text column that must hold large payloads (embedded images, secrets)
struct WideColumn {
    table: &'static str,
    column: &'static str,
}

const WIDE_COLUMNS: [WideColumn; 2] = [
    WideColumn {
        table: PRODUCTS,
        column: "image_url",
    },
    WideColumn {
        table: SETTINGS,
        column: "setting_value",
    },
];

fn wide_type(dialect: Dialect) -> &'static str {
    match dialect {
        Dialect::MySql => "LONGTEXT",
        Dialect::Postgres => "TEXT",
    }
}

fn is_wide_enough(dialect: Dialect, data_type: &str) -> bool {
    match dialect {
        Dialect::MySql => data_type == "longtext",
        Dialect::Postgres => data_type == "text",
    }
}

/// Forward migration step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationStep {
    AddColumn {
        table: String,
        column: String,
        definition: String,
    },
    WidenColumn {
        table: String,
        column: String,
        from: String,
        to: String,
    },
}

impl MigrationStep {
    pub fn sql(&self, dialect: Dialect) -> String {
        match (self, dialect) {
            (MigrationStep::AddColumn { table, column, definition }, Dialect::MySql) => {
                format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, definition)
            }
            (MigrationStep::AddColumn { table, column, definition }, Dialect::Postgres) => {
                format!(
                    "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {} {}",
                    table, column, definition
                )
            }
            (MigrationStep::WidenColumn { table, column, to, .. }, Dialect::MySql) => {
                format!("ALTER TABLE {} MODIFY COLUMN {} {} NULL", table, column, to)
            }
            (MigrationStep::WidenColumn { table, column, to, .. }, Dialect::Postgres) => {
                format!("ALTER TABLE {} ALTER COLUMN {} TYPE {}", table, column, to)
            }
        }
    }

    /// `table.column`, used in reports and logs
    pub fn target(&self) -> String {
        match self {
            MigrationStep::AddColumn { table, column, .. }
            | MigrationStep::WidenColumn { table, column, .. } => format!("{}.{}", table, column),
        }
    }
}

/// Compute the steps needed to bring `existing` up to date
///
/// Tables absent from `existing` are skipped: they were just created from the
/// current DDL or could not be created at all.
pub fn plan_migrations(dialect: Dialect, existing: &[ColumnMeta]) -> Vec<MigrationStep> {
    let has_table = |table: &str| existing.iter().any(|c| c.table == table);
    let find = |table: &str, column: &str| {
        existing
            .iter()
            .find(|c| c.table == table && c.column.eq_ignore_ascii_case(column))
    };

    let mut steps = Vec::new();

    for added in &ADDED_COLUMNS {
        if has_table(added.table) && find(added.table, added.column).is_none() {
            steps.push(MigrationStep::AddColumn {
                table: added.table.to_string(),
                column: added.column.to_string(),
                definition: added.definition.to_string(),
            });
        }
    }

    for wide in &WIDE_COLUMNS {
        if !has_table(wide.table) {
            continue;
        }
        match find(wide.table, wide.column) {
            Some(meta) if !is_wide_enough(dialect, &meta.data_type) => {
                steps.push(MigrationStep::WidenColumn {
                    table: wide.table.to_string(),
                    column: wide.column.to_string(),
                    from: meta.data_type.clone(),
                    to: wide_type(dialect).to_string(),
                });
            }
            Some(_) => {}
            None => steps.push(MigrationStep::AddColumn {
                table: wide.table.to_string(),
                column: wide.column.to_string(),
                definition: format!("{} NULL", wide_type(dialect)),
            }),
        }
    }

    steps
}

/// Index on a document-store collection (keys ascending)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentIndexSpec {
    pub collection: &'static str,
    pub name: &'static str,
    pub keys: &'static [&'static str],
    pub unique: bool,
}

pub const DOCUMENT_INDEXES: [DocumentIndexSpec; 4] = [
    DocumentIndexSpec {
        collection: PRODUCTS,
        name: "uq_user_name",
        keys: &["userId", "name"],
        unique: true,
    },
    DocumentIndexSpec {
        collection: PRODUCTS,
        name: "uq_user_product_id",
        keys: &["userId", "productId"],
        unique: true,
    },
    DocumentIndexSpec {
        collection: TRANSACTIONS,
        name: "idx_user_product",
        keys: &["userId", "productId"],
        unique: false,
    },
    DocumentIndexSpec {
        collection: SETTINGS,
        name: "uq_key",
        keys: &["key"],
        unique: true,
    },
];

/// What one `ensure` pass changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchemaReport {
    pub created: Vec<String>,
    pub columns_added: Vec<String>,
    pub columns_widened: Vec<String>,
    pub indexes_created: Vec<String>,
    /// Swallowed failures; the connection stays usable
    pub failures: Vec<String>,
}

impl SchemaReport {
    /// True when the pass changed nothing
    pub fn is_noop(&self) -> bool {
        self.created.is_empty()
            && self.columns_added.is_empty()
            && self.columns_widened.is_empty()
            && self.indexes_created.is_empty()
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    pub(crate) fn record_step(&mut self, step: &MigrationStep) {
        match step {
            MigrationStep::AddColumn { .. } => self.columns_added.push(step.target()),
            MigrationStep::WidenColumn { .. } => self.columns_widened.push(step.target()),
        }
    }

    /// Record a best-effort failure and surface it on the diagnostics log
    pub(crate) fn record_failure(&mut self, what: &str, error: impl std::fmt::Display) {
        log::warn!(target: "shelfdb::schema", "{} failed: {}", what, error);
        self.failures.push(format!("{}: {}", what, error));
    }
}
