use rusqlite::{Connection, DatabaseName};

pub const SCHEMA_VERSION: u32 = 3;

/// Schema name the write-cache database is attached under.
pub const WRITE_CACHE_SCHEMA: &str = "writecache";

pub const STRING_TABLE: &str = "StringInfo3";

/// The three scope tables. Each exists once in the main database and once in
/// the write cache with an identical shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Solution,
    Project,
    Document,
}

impl Table {
    pub const ALL: [Table; 3] = [Table::Solution, Table::Project, Table::Document];

    pub fn name(self) -> &'static str {
        match self {
            Table::Solution => "SolutionData3",
            Table::Project => "ProjectData3",
            Table::Document => "DocumentData3",
        }
    }

    fn id_column_type(self) -> &'static str {
        match self {
            Table::Solution => "varchar",
            Table::Project | Table::Document => "integer",
        }
    }
}

/// Which physical copy of a scope table a row lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    WriteCache,
    Main,
}

impl Location {
    pub fn schema(self) -> &'static str {
        match self {
            Location::WriteCache => WRITE_CACHE_SCHEMA,
            Location::Main => "main",
        }
    }

    pub fn database_name(self) -> DatabaseName<'static> {
        match self {
            Location::WriteCache => DatabaseName::Attached(WRITE_CACHE_SCHEMA),
            Location::Main => DatabaseName::Main,
        }
    }

    pub fn qualified(self, table: Table) -> String {
        format!("{}.{}", self.schema(), table.name())
    }
}

fn create_data_table(schema: &str, table: Table) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {schema}.{name} (
            DataId {ty} PRIMARY KEY NOT NULL,
            Checksum blob,
            Data blob
        );",
        name = table.name(),
        ty = table.id_column_type(),
    )
}

/// Idempotent schema creation for both the main and the write-cache database.
pub fn create(conn: &Connection) -> rusqlite::Result<()> {
    let mut sql = String::from("BEGIN;\n");
    sql.push_str(&format!(
        "CREATE TABLE IF NOT EXISTS main.{STRING_TABLE} (
            DataId integer PRIMARY KEY AUTOINCREMENT NOT NULL,
            Data varchar
        );
        CREATE UNIQUE INDEX IF NOT EXISTS main.\"StringInfo{SCHEMA_VERSION}_Data\"
            ON {STRING_TABLE}(Data);\n"
    ));
    for location in [Location::Main, Location::WriteCache] {
        for table in Table::ALL {
            sql.push_str(&create_data_table(location.schema(), table));
            sql.push('\n');
        }
    }
    sql.push_str("COMMIT;");
    conn.execute_batch(&sql)
}

/// Copy every write-cache row into its main table, then clear the write cache.
///
/// Must run inside a transaction so the copy and the clear commit together.
pub fn flush_write_cache(conn: &Connection) -> rusqlite::Result<usize> {
    debug_assert!(!conn.is_autocommit(), "flush must run inside a transaction");
    let mut moved = 0;
    for table in Table::ALL {
        moved += conn.execute(
            &format!(
                "INSERT OR REPLACE INTO {} SELECT * FROM {}",
                Location::Main.qualified(table),
                Location::WriteCache.qualified(table)
            ),
            [],
        )?;
        conn.execute(
            &format!("DELETE FROM {}", Location::WriteCache.qualified(table)),
            [],
        )?;
    }
    Ok(moved)
}

pub fn count_rows(conn: &Connection, location: Location, table: Table) -> rusqlite::Result<u64> {
    conn.query_row(
        &format!("SELECT COUNT(*) FROM {}", location.qualified(table)),
        [],
        |row| row.get::<_, i64>(0),
    )
    .map(|n| n as u64)
}
