//! DDL string generation shared by both backends. Both SQLite and Postgres
//! accept the same quoting and column-type strings here; the differences
//! between backends live in `sqlite::builder`/`postgres::builder`.
//!
//! Grounded on `db/sqlite_builder.py::create_tables` (which bakes PK and FK
//! clauses straight into the `CREATE TABLE` statement, since SQLite has no
//! `ALTER TABLE ADD CONSTRAINT`) and `db/postgres_builder.py::create_tables`
//! (columns only; PK and FK both follow later via `ALTER TABLE`, after
//! `patch_data` has deduplicated `empresa`).

use cnpj_core::schema::TableSpec;

/// `CREATE TABLE "name" (col1 type1, col2 type2, [extra constraints...])`.
///
/// Primary keys for small reference tables are already embedded in their
/// column type strings (e.g. `VARCHAR(3) PRIMARY KEY`). `empresa` and
/// `estabelecimento` additionally declare a composite `TableSpec::primary_key`
/// that is NOT in any column's type string; `inline_primary_key` controls
/// whether that composite key is appended as a table constraint here
/// (SQLite: yes, at creation) or left for a later `ALTER TABLE ADD PRIMARY
/// KEY` (Postgres, once `patch_data` has removed duplicates).
/// `inline_foreign_keys` does the same for the catalog's FK list.
pub fn create_table_sql(table: &TableSpec, unlogged: bool, inline_primary_key: bool, inline_foreign_keys: bool) -> String {
    let mut defs: Vec<String> =
        table.columns.iter().map(|c| format!("\"{}\" {}", c.name, c.sql_type)).collect();

    if inline_primary_key && needs_deferred_pk(table) {
        let cols = table.primary_key.iter().map(|c| format!("\"{c}\"")).collect::<Vec<_>>().join(", ");
        defs.push(format!("PRIMARY KEY ({cols})"));
    }

    if inline_foreign_keys {
        for fk in table.foreign_keys {
            let cols = fk.columns.iter().map(|c| format!("\"{c}\"")).collect::<Vec<_>>().join(", ");
            let ref_cols = fk.ref_columns.iter().map(|c| format!("\"{c}\"")).collect::<Vec<_>>().join(", ");
            defs.push(format!("FOREIGN KEY ({cols}) REFERENCES \"{}\" ({ref_cols})", fk.ref_table));
        }
    }

    let modifier = if unlogged { "UNLOGGED " } else { "" };
    format!("CREATE {modifier}TABLE IF NOT EXISTS \"{}\" (\n    {}\n)", table.name, defs.join(",\n    "))
}

pub fn insert_columns_list(table: &TableSpec) -> String {
    table.columns.iter().map(|c| format!("\"{}\"", c.name)).collect::<Vec<_>>().join(", ")
}

pub fn drop_table_sql(table_name: &str) -> String {
    format!("DROP TABLE IF EXISTS \"{table_name}\" CASCADE")
}

pub fn create_index_sql(table_name: &str, index: &cnpj_core::schema::Index) -> String {
    let cols = index.columns.iter().map(|c| format!("\"{c}\"")).collect::<Vec<_>>().join(", ");
    format!("CREATE INDEX IF NOT EXISTS \"{}\" ON \"{table_name}\" ({cols})", index.name)
}

pub fn add_foreign_key_sql(table_name: &str, fk: &cnpj_core::schema::ForeignKey, index: usize) -> (String, String) {
    let constraint_name = format!("fk_{table_name}_{index}");
    let cols = fk.columns.iter().map(|c| format!("\"{c}\"")).collect::<Vec<_>>().join(", ");
    let ref_cols = fk.ref_columns.iter().map(|c| format!("\"{c}\"")).collect::<Vec<_>>().join(", ");
    let sql = format!(
        "ALTER TABLE \"{table_name}\" ADD CONSTRAINT \"{constraint_name}\" FOREIGN KEY ({cols}) REFERENCES \"{}\" ({ref_cols})",
        fk.ref_table
    );
    (constraint_name, sql)
}

pub fn add_primary_key_sql(table_name: &str, pk: &[&str]) -> String {
    let cols = pk.iter().map(|c| format!("\"{c}\"")).collect::<Vec<_>>().join(", ");
    format!("ALTER TABLE \"{table_name}\" ADD PRIMARY KEY ({cols})")
}

/// True for the large fact tables (`empresa`, `estabelecimento`) whose
/// primary key is a separate composite constraint rather than inline on a
/// single column. Reference tables carry `PRIMARY KEY` in their one column's
/// type string already and need no extra constraint clause.
pub fn needs_deferred_pk(table: &TableSpec) -> bool {
    !table.primary_key.is_empty() && !table.columns.iter().any(|c| c.sql_type.contains("PRIMARY KEY"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cnpj_core::schema::table_by_name;

    #[test]
    fn create_table_sql_embeds_inline_pk_for_reference_tables() {
        let table = table_by_name("cnae").unwrap();
        let sql = create_table_sql(table, false, false, false);
        assert!(sql.contains("PRIMARY KEY"));
        assert!(!sql.starts_with("CREATE UNLOGGED"));
    }

    #[test]
    fn create_table_sql_respects_unlogged_flag() {
        let table = table_by_name("empresa").unwrap();
        let sql = create_table_sql(table, true, false, false);
        assert!(sql.starts_with("CREATE UNLOGGED TABLE"));
        assert!(!sql.contains("PRIMARY KEY"), "postgres path defers the composite PK");
    }

    #[test]
    fn create_table_sql_embeds_foreign_keys_when_requested() {
        let table = table_by_name("estabelecimento").unwrap();
        let sql = create_table_sql(table, false, false, true);
        assert!(sql.contains("FOREIGN KEY (\"cnpj_basico\") REFERENCES \"empresa\""));
    }

    #[test]
    fn create_table_sql_embeds_composite_primary_key_when_requested() {
        let table = table_by_name("empresa").unwrap();
        let sql = create_table_sql(table, false, true, false);
        assert!(sql.contains("PRIMARY KEY (\"cnpj_basico\")"));
    }

    #[test]
    fn needs_deferred_pk_is_true_only_for_large_fact_tables() {
        assert!(needs_deferred_pk(table_by_name("empresa").unwrap()));
        assert!(needs_deferred_pk(table_by_name("estabelecimento").unwrap()));
        assert!(!needs_deferred_pk(table_by_name("cnae").unwrap()));
        assert!(!needs_deferred_pk(table_by_name("simples").unwrap()));
    }

    #[test]
    fn add_foreign_key_sql_names_constraint_by_table_and_index() {
        let table = table_by_name("estabelecimento").unwrap();
        let fk = &table.foreign_keys[0];
        let (name, sql) = add_foreign_key_sql(table.name, fk, 1);
        assert_eq!(name, "fk_estabelecimento_1");
        assert!(sql.contains("ADD CONSTRAINT \"fk_estabelecimento_1\""));
    }
}
