//! The CNPJ dataset's table catalog.
//!
//! This is the single source of truth for table layout, primary/foreign
//! keys and indexes. Both database backends (`cnpj-db`) generate their DDL
//! from it, and the archive producer (`cnpj-io`) uses it to resolve a zip
//! file name to its target table(s).

use once_cell::sync::Lazy;
use std::collections::HashMap;

/// One column: its name and a backend-neutral type/constraint string.
///
/// The type strings (`VARCHAR(n)`, `NUMERIC(16,2)`, `DATE`, `TEXT`) are
/// valid SQL on both SQLite and Postgres; SQLite ignores the length
/// qualifiers via type affinity, Postgres honors them.
#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub name: &'static str,
    pub sql_type: &'static str,
}

impl Column {
    const fn new(name: &'static str, sql_type: &'static str) -> Self {
        Self { name, sql_type }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ForeignKey {
    pub columns: &'static [&'static str],
    pub ref_table: &'static str,
    pub ref_columns: &'static [&'static str],
}

#[derive(Debug, Clone, Copy)]
pub struct Index {
    pub name: &'static str,
    pub columns: &'static [&'static str],
}

/// A single table's complete definition.
#[derive(Debug, Clone, Copy)]
pub struct TableSpec {
    pub name: &'static str,
    /// Stem of the zip/csv files that feed this table, with any trailing
    /// digits stripped (e.g. `Estabelecimentos0.zip` -> `Estabelecimentos`).
    pub source_file_stem: &'static str,
    pub columns: &'static [Column],
    pub primary_key: &'static [&'static str],
    pub foreign_keys: &'static [ForeignKey],
    pub indexes: &'static [Index],
}

impl TableSpec {
    pub fn column_names(&self) -> Vec<&'static str> {
        self.columns.iter().map(|c| c.name).collect()
    }
}

static CNAE_COLUMNS: &[Column] = &[
    Column::new("cod_cnae", "VARCHAR(7) PRIMARY KEY"),
    Column::new("nome_cnae", "VARCHAR(200) NOT NULL"),
];

static MOTIVO_COLUMNS: &[Column] = &[
    Column::new("cod_motivo", "VARCHAR(2) PRIMARY KEY"),
    Column::new("nome_motivo", "VARCHAR(100) NOT NULL"),
];

static MUNICIPIO_COLUMNS: &[Column] = &[
    Column::new("cod_municipio", "VARCHAR(4) PRIMARY KEY"),
    Column::new("nome_municipio", "VARCHAR(60) NOT NULL"),
];

static NATUREZA_JURIDICA_COLUMNS: &[Column] = &[
    Column::new("cod_natureza", "VARCHAR(4) PRIMARY KEY"),
    Column::new("nome_natureza", "VARCHAR(200) NOT NULL"),
];

static PAIS_COLUMNS: &[Column] = &[
    Column::new("cod_pais", "VARCHAR(3) PRIMARY KEY"),
    Column::new("nome_pais", "VARCHAR(60) NOT NULL"),
];

static QUALIFICACAO_SOCIO_COLUMNS: &[Column] = &[
    Column::new("cod_qualificacao", "VARCHAR(2) PRIMARY KEY"),
    Column::new("nome_qualificacao", "VARCHAR(200) NOT NULL"),
];

static EMPRESA_COLUMNS: &[Column] = &[
    Column::new("cnpj_basico", "VARCHAR(8)"),
    Column::new("razao_social", "VARCHAR(200)"),
    Column::new("cod_natureza_juridica", "VARCHAR(4) NOT NULL"),
    Column::new("cod_qualificacao_responsavel", "VARCHAR(2) NOT NULL"),
    Column::new("capital_social", "NUMERIC(16,2) NOT NULL"),
    Column::new("cod_porte", "VARCHAR(2)"),
    Column::new("ente_federativo_responsavel", "VARCHAR(100)"),
];

static EMPRESA_FKS: &[ForeignKey] = &[
    ForeignKey {
        columns: &["cod_natureza_juridica"],
        ref_table: "natureza_juridica",
        ref_columns: &["cod_natureza"],
    },
    ForeignKey {
        columns: &["cod_qualificacao_responsavel"],
        ref_table: "qualificacao_socio",
        ref_columns: &["cod_qualificacao"],
    },
];

static EMPRESA_INDEXES: &[Index] = &[
    Index { name: "idx_empresa_cnpj", columns: &["cnpj_basico"] },
    Index { name: "idx_empresa_razao_social", columns: &["razao_social"] },
    Index { name: "idx_empresa_natureza", columns: &["cod_natureza_juridica"] },
    Index { name: "idx_empresa_porte", columns: &["cod_porte"] },
];

static ESTABELECIMENTO_COLUMNS: &[Column] = &[
    Column::new("cnpj_basico", "VARCHAR(8) NOT NULL"),
    Column::new("cnpj_ordem", "VARCHAR(4) NOT NULL"),
    Column::new("cnpj_dv", "VARCHAR(2) NOT NULL"),
    Column::new("matriz_filial", "VARCHAR(1) NOT NULL"),
    Column::new("nome_fantasia", "VARCHAR(60)"),
    Column::new("cod_situacao_cadastral", "VARCHAR(2) NOT NULL"),
    Column::new("data_situacao_cadastral", "DATE"),
    Column::new("cod_motivo_situacao_cadastral", "VARCHAR(2) NOT NULL"),
    Column::new("nome_cidade_exterior", "VARCHAR(60)"),
    Column::new("cod_pais", "VARCHAR(3)"),
    Column::new("data_inicio_atividade", "DATE NOT NULL"),
    Column::new("cod_cnae_principal", "VARCHAR(7) NOT NULL"),
    Column::new("cod_cnae_secundario", "TEXT"),
    Column::new("tipo_logradouro", "VARCHAR(20)"),
    Column::new("logradouro", "VARCHAR(60)"),
    Column::new("numero", "VARCHAR(6)"),
    Column::new("complemento", "VARCHAR(200)"),
    Column::new("bairro", "VARCHAR(60)"),
    Column::new("cep", "VARCHAR(8)"),
    Column::new("uf", "VARCHAR(2) NOT NULL"),
    Column::new("cod_municipio", "VARCHAR(4)"),
    Column::new("ddd_telefone_1", "VARCHAR(4)"),
    Column::new("telefone_1", "VARCHAR(10)"),
    Column::new("ddd_telefone_2", "VARCHAR(4)"),
    Column::new("telefone_2", "VARCHAR(10)"),
    Column::new("ddd_fax", "VARCHAR(4)"),
    Column::new("fax", "VARCHAR(10)"),
    Column::new("email", "TEXT"),
    Column::new("situacao_especial", "VARCHAR(100)"),
    Column::new("data_situacao_especial", "DATE"),
];

static ESTABELECIMENTO_FKS: &[ForeignKey] = &[
    ForeignKey { columns: &["cnpj_basico"], ref_table: "empresa", ref_columns: &["cnpj_basico"] },
    ForeignKey { columns: &["cod_cnae_principal"], ref_table: "cnae", ref_columns: &["cod_cnae"] },
    ForeignKey { columns: &["cod_municipio"], ref_table: "municipio", ref_columns: &["cod_municipio"] },
    ForeignKey { columns: &["cod_pais"], ref_table: "pais", ref_columns: &["cod_pais"] },
    ForeignKey {
        columns: &["cod_motivo_situacao_cadastral"],
        ref_table: "motivo",
        ref_columns: &["cod_motivo"],
    },
];

static ESTABELECIMENTO_INDEXES: &[Index] = &[
    Index { name: "idx_estab_empresa", columns: &["cnpj_basico"] },
    Index { name: "idx_estab_nome_fantasia", columns: &["nome_fantasia"] },
    Index { name: "idx_estab_cnae_principal", columns: &["cod_cnae_principal"] },
    Index { name: "idx_estab_data_inicio", columns: &["data_inicio_atividade"] },
    Index { name: "idx_estab_data_situacao", columns: &["data_situacao_cadastral"] },
    Index { name: "idx_estab_municipio", columns: &["cod_municipio"] },
    Index { name: "idx_estab_uf_municipio", columns: &["uf", "cod_municipio"] },
    Index { name: "idx_estab_situacao", columns: &["cod_situacao_cadastral"] },
];

static SIMPLES_COLUMNS: &[Column] = &[
    Column::new("cnpj_basico", "VARCHAR(8)"),
    Column::new("opcao_simples", "VARCHAR(1)"),
    Column::new("data_opcao_simples", "DATE"),
    Column::new("data_exclusao_simples", "DATE"),
    Column::new("opcao_mei", "VARCHAR(1)"),
    Column::new("data_opcao_mei", "DATE"),
    Column::new("data_exclusao_mei", "DATE"),
];

static SIMPLES_FKS: &[ForeignKey] = &[ForeignKey {
    columns: &["cnpj_basico"],
    ref_table: "empresa",
    ref_columns: &["cnpj_basico"],
}];

static SIMPLES_INDEXES: &[Index] =
    &[Index { name: "idx_simples_empresa", columns: &["cnpj_basico"] }];

static SOCIO_COLUMNS: &[Column] = &[
    Column::new("cnpj_basico", "VARCHAR(8) NOT NULL"),
    Column::new("identificador_socio", "VARCHAR(1) NOT NULL"),
    Column::new("nome_socio", "VARCHAR(200)"),
    Column::new("cnpj_cpf_socio", "VARCHAR(14)"),
    Column::new("cod_qualificacao_socio", "VARCHAR(2) NOT NULL"),
    Column::new("data_entrada_sociedade", "DATE NOT NULL"),
    Column::new("cod_pais", "VARCHAR(3)"),
    Column::new("cpf_representante_legal", "VARCHAR(11)"),
    Column::new("nome_representante_legal", "VARCHAR(100)"),
    Column::new("cod_qualificacao_representante_legal", "VARCHAR(2)"),
    Column::new("cod_faixa_etaria", "VARCHAR(1) NOT NULL"),
];

static SOCIO_FKS: &[ForeignKey] = &[
    ForeignKey { columns: &["cnpj_basico"], ref_table: "empresa", ref_columns: &["cnpj_basico"] },
    ForeignKey { columns: &["cod_pais"], ref_table: "pais", ref_columns: &["cod_pais"] },
    ForeignKey {
        columns: &["cod_qualificacao_socio"],
        ref_table: "qualificacao_socio",
        ref_columns: &["cod_qualificacao"],
    },
    ForeignKey {
        columns: &["cod_qualificacao_representante_legal"],
        ref_table: "qualificacao_socio",
        ref_columns: &["cod_qualificacao"],
    },
];

static SOCIO_INDEXES: &[Index] = &[
    Index { name: "idx_socio_empresa", columns: &["cnpj_basico"] },
    Index { name: "idx_socio_cpf_cnpj", columns: &["cnpj_cpf_socio"] },
    Index { name: "idx_socio_nome", columns: &["nome_socio"] },
];

static ESTABELECIMENTO_CNAE_SEC_COLUMNS: &[Column] = &[
    Column::new("cnpj_basico", "VARCHAR(8) NOT NULL"),
    Column::new("cnpj_ordem", "VARCHAR(4) NOT NULL"),
    Column::new("cnpj_dv", "VARCHAR(2) NOT NULL"),
    Column::new("cod_cnae", "VARCHAR(7) NOT NULL"),
];

static ESTABELECIMENTO_CNAE_SEC_FKS: &[ForeignKey] = &[
    ForeignKey {
        columns: &["cnpj_basico", "cnpj_ordem", "cnpj_dv"],
        ref_table: "estabelecimento",
        ref_columns: &["cnpj_basico", "cnpj_ordem", "cnpj_dv"],
    },
    ForeignKey { columns: &["cod_cnae"], ref_table: "cnae", ref_columns: &["cod_cnae"] },
];

static ESTABELECIMENTO_CNAE_SEC_INDEXES: &[Index] = &[Index {
    name: "idx_cnae_sec_estab",
    columns: &["cnpj_basico", "cnpj_ordem", "cnpj_dv"],
}];

/// Tables in an order safe for sequential creation and loading: referenced
/// (lookup) tables first, then the tables that hold foreign keys into them.
/// `cnpj-db`'s FK-enabling phase runs after all of these have loaded, so
/// load order here is about readability, not correctness.
static TABLES: &[TableSpec] = &[
    TableSpec {
        name: "cnae",
        source_file_stem: "Cnaes",
        columns: CNAE_COLUMNS,
        primary_key: &["cod_cnae"],
        foreign_keys: &[],
        indexes: &[],
    },
    TableSpec {
        name: "motivo",
        source_file_stem: "Motivos",
        columns: MOTIVO_COLUMNS,
        primary_key: &["cod_motivo"],
        foreign_keys: &[],
        indexes: &[],
    },
    TableSpec {
        name: "municipio",
        source_file_stem: "Municipios",
        columns: MUNICIPIO_COLUMNS,
        primary_key: &["cod_municipio"],
        foreign_keys: &[],
        indexes: &[],
    },
    TableSpec {
        name: "natureza_juridica",
        source_file_stem: "Naturezas",
        columns: NATUREZA_JURIDICA_COLUMNS,
        primary_key: &["cod_natureza"],
        foreign_keys: &[],
        indexes: &[],
    },
    TableSpec {
        name: "pais",
        source_file_stem: "Paises",
        columns: PAIS_COLUMNS,
        primary_key: &["cod_pais"],
        foreign_keys: &[],
        indexes: &[],
    },
    TableSpec {
        name: "qualificacao_socio",
        source_file_stem: "Qualificacoes",
        columns: QUALIFICACAO_SOCIO_COLUMNS,
        primary_key: &["cod_qualificacao"],
        foreign_keys: &[],
        indexes: &[],
    },
    TableSpec {
        name: "empresa",
        source_file_stem: "Empresas",
        columns: EMPRESA_COLUMNS,
        primary_key: &["cnpj_basico"],
        foreign_keys: EMPRESA_FKS,
        indexes: EMPRESA_INDEXES,
    },
    TableSpec {
        name: "estabelecimento",
        source_file_stem: "Estabelecimentos",
        columns: ESTABELECIMENTO_COLUMNS,
        primary_key: &["cnpj_basico", "cnpj_ordem", "cnpj_dv"],
        foreign_keys: ESTABELECIMENTO_FKS,
        indexes: ESTABELECIMENTO_INDEXES,
    },
    TableSpec {
        name: "simples",
        source_file_stem: "Simples",
        columns: SIMPLES_COLUMNS,
        primary_key: &[],
        foreign_keys: SIMPLES_FKS,
        indexes: SIMPLES_INDEXES,
    },
    TableSpec {
        name: "socio",
        source_file_stem: "Socios",
        columns: SOCIO_COLUMNS,
        primary_key: &[],
        foreign_keys: SOCIO_FKS,
        indexes: SOCIO_INDEXES,
    },
    // Derived table: one row per (establishment, secondary CNAE), split out
    // of estabelecimento's comma-joined cod_cnae_secundario column. Shares
    // estabelecimento's source file.
    TableSpec {
        name: "estabelecimento_cnae_sec",
        source_file_stem: "Estabelecimentos",
        columns: ESTABELECIMENTO_CNAE_SEC_COLUMNS,
        primary_key: &[],
        foreign_keys: ESTABELECIMENTO_CNAE_SEC_FKS,
        indexes: ESTABELECIMENTO_CNAE_SEC_INDEXES,
    },
];

/// `source_file_stem` (lowercased) -> every table it feeds. Most stems feed
/// exactly one table; `Estabelecimentos` feeds two.
static STEM_INDEX: Lazy<HashMap<String, Vec<&'static TableSpec>>> = Lazy::new(|| {
    let mut map: HashMap<String, Vec<&'static TableSpec>> = HashMap::new();
    for table in TABLES {
        map.entry(table.source_file_stem.to_ascii_lowercase())
            .or_default()
            .push(table);
    }
    map
});

static BY_NAME: Lazy<HashMap<&'static str, &'static TableSpec>> =
    Lazy::new(|| TABLES.iter().map(|t| (t.name, t)).collect());

/// All tables, in catalog (creation) order.
pub fn tables_in_order() -> &'static [TableSpec] {
    TABLES
}

pub fn table_by_name(name: &str) -> Option<&'static TableSpec> {
    BY_NAME.get(name).copied()
}

/// Strips a trailing run of ASCII digits from an archive stem, then looks
/// up every table fed by that stem, e.g. `Estabelecimentos3` -> `Estabelecimentos`
/// -> `[estabelecimento, estabelecimento_cnae_sec]`.
///
/// Matching is case-insensitive because the official archives vary casing
/// release to release.
pub fn targets_for_archive_stem(stem: &str) -> Vec<&'static TableSpec> {
    let trimmed = stem.trim_end_matches(|c: char| c.is_ascii_digit());
    STEM_INDEX
        .get(&trimmed.to_ascii_lowercase())
        .cloned()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eleven_tables_are_cataloged() {
        assert_eq!(tables_in_order().len(), 11);
    }

    #[test]
    fn estabelecimentos_stem_feeds_two_tables() {
        let targets = targets_for_archive_stem("Estabelecimentos0");
        let names: Vec<_> = targets.iter().map(|t| t.name).collect();
        assert_eq!(names.len(), 2, "expected 2 targets, got {names:?}");
        assert!(names.contains(&"estabelecimento"));
        assert!(names.contains(&"estabelecimento_cnae_sec"));
    }

    #[test]
    fn stem_matching_strips_trailing_digits_and_ignores_case() {
        let targets = targets_for_archive_stem("empresas9");
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].name, "empresa");
    }

    #[test]
    fn unknown_stem_yields_no_targets() {
        assert!(targets_for_archive_stem("Desconhecido1").is_empty());
    }

    #[test]
    fn empresa_has_expected_primary_key_and_fks() {
        let empresa = table_by_name("empresa").unwrap();
        assert_eq!(empresa.primary_key, &["cnpj_basico"]);
        assert_eq!(empresa.foreign_keys.len(), 2);
    }

    #[test]
    fn estabelecimento_cnae_sec_references_composite_key() {
        let table = table_by_name("estabelecimento_cnae_sec").unwrap();
        let fk = table
            .foreign_keys
            .iter()
            .find(|fk| fk.ref_table == "estabelecimento")
            .unwrap();
        assert_eq!(fk.columns, &["cnpj_basico", "cnpj_ordem", "cnpj_dv"]);
    }
}
