//! The fixed set of post-load data repairs, shared verbatim by both
//! backends. Grounded on `utils/db_patch.py`'s `apply_static_fixes`.

/// `(cod_qualificacao, nome_qualificacao)` rows missing from the upstream
/// reference table but referenced by fact data.
pub const MISSING_QUALIFICACOES: &[(&str, &str)] = &[("36", "Gerente-Delegado")];

/// `(cod_motivo, nome_motivo)` rows missing from the upstream reference
/// table.
pub const MISSING_MOTIVOS: &[(&str, &str)] = &[
    ("32", "DECURSO DE PRAZO DE INTERRUPCAO TEMPORARIA"),
    ("81", "SOLICITACAO DA ADMINISTRACAO TRIBUTARIA MUNICIPAL/ESTADUAL - SC"),
    ("93", "CNPJ - TITULAR BAIXADO"),
];

/// `(cod_pais, nome_pais)` rows missing from the upstream reference table.
pub const MISSING_PAISES: &[(&str, &str)] = &[
    ("008", "ABU DHABI"),
    ("009", "DIRCE"),
    ("015", "ALAND, ILHAS"),
    ("150", "JERSEY"),
    ("151", "CANARIAS, ILHAS"),
    ("200", "CURACAO"),
    ("321", "GUERNSEY"),
    ("359", "MAN, ILHA DE"),
    ("367", "INGLATERRA"),
    ("393", "JERSEY"),
    ("449", "MACEDONIA (ANTIGA REP. IUGOSLAVA)"),
    ("452", "MADEIRA, ILHA DA"),
    ("498", "MOLDAVIA"),
    ("678", "SAO TOME E PRINCIPE"),
    ("699", "SAO MARTINHO, ILHA DE (PARTE HOLANDESA)"),
    ("737", "SERVIA"),
    ("994", "AZERBAIJAO"),
];

/// `empresa.cnpj_basico` values whose `simples` rows are known-broken and
/// must be deleted.
pub const BROKEN_SIMPLES_CNPJ_BASICO: &[&str] = &[
    "24417449", "24539162", "30721933", "30728066", "30760363", "30847991", "30857441", "30886793", "30972017",
];
