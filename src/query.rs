use std::fmt::Write as _;

use crate::config::QueryFilters;
use crate::domain::FieldName;

const DUAL_TABLE: &str = "idr5.idr5_dual";
const PSF_TABLE: &str = "idr5.idr5_psf";
const CLASS_TABLE: &str = "idr5_vacs.idr5_sqg";

const DUAL_COLUMNS: &[&str] = &[
    "Field",
    "ID",
    "RA",
    "DEC",
    "X",
    "Y",
    "PETRO_RADIUS",
    "KRON_RADIUS",
    "s2n_DET_PStotal",
    "s2n_r_PStotal",
    "s2n_J0660_PStotal",
    "s2n_i_PStotal",
    "SEX_FLAGS_DET",
    "SEX_FLAGS_r",
    "SEX_FLAGS_i",
    "SEX_FLAGS_J0660",
];

const BANDS: &[&str] = &[
    "r", "g", "i", "u", "z", "j0378", "j0395", "j0410", "j0430", "j0515", "j0660", "j0861",
];

const CLASS_COLUMNS: &[&str] = &["CLASS", "PROB_STAR", "PROB_QSO", "PROB_GAL"];

/// Bands whose PStotal error must stay under the threshold.
const FILTER_BANDS: &[&str] = &[
    "J0395", "J0410", "J0430", "g", "J0515", "r", "J0660", "i", "J0861", "z",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    /// At most one row, only to learn whether the field has data.
    Probe,
    /// Full filtered catalog of the field.
    Catalog,
}

/// Fully parameterized request for one field. Rebuilding it from the same
/// inputs always yields the same ADQL.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySpec {
    field: FieldName,
    kind: QueryKind,
    filters: QueryFilters,
}

impl QuerySpec {
    pub fn probe(field: &FieldName) -> Self {
        Self {
            field: field.clone(),
            kind: QueryKind::Probe,
            filters: QueryFilters {
                max_band_error: 0.0,
                object_class: 0,
            },
        }
    }

    pub fn catalog(field: &FieldName, filters: &QueryFilters) -> Self {
        Self {
            field: field.clone(),
            kind: QueryKind::Catalog,
            filters: filters.clone(),
        }
    }

    pub fn field(&self) -> &FieldName {
        &self.field
    }

    pub fn kind(&self) -> QueryKind {
        self.kind
    }

    pub fn to_adql(&self) -> String {
        match self.kind {
            QueryKind::Probe => format!(
                "SELECT TOP 1 Field FROM {DUAL_TABLE} WHERE Field = {}",
                quote(self.field.as_str())
            ),
            QueryKind::Catalog => self.catalog_adql(),
        }
    }

    fn catalog_adql(&self) -> String {
        let mut select: Vec<String> = DUAL_COLUMNS
            .iter()
            .map(|col| format!("dual.{col}"))
            .collect();
        for band in BANDS {
            select.push(format!("dual.{band}_PStotal"));
            select.push(format!("dual.e_{band}_PStotal"));
        }
        for band in BANDS {
            select.push(format!("psf.{band}_psf"));
            select.push(format!("psf.e_{band}_psf"));
        }
        select.extend(CLASS_COLUMNS.iter().map(|col| format!("sgq.{col}")));

        let mut adql = String::new();
        let _ = write!(
            adql,
            "SELECT {} FROM {DUAL_TABLE} AS dual \
             LEFT JOIN {PSF_TABLE} AS psf USING(ID) \
             LEFT JOIN {CLASS_TABLE} AS sgq USING(ID) WHERE ",
            select.join(", ")
        );
        for band in FILTER_BANDS {
            let _ = write!(adql, "e_{band}_PStotal <= {} AND ", self.filters.max_band_error);
        }
        let _ = write!(
            adql,
            "sgq.CLASS = {} AND dual.Field = {}",
            self.filters.object_class,
            quote(self.field.as_str())
        );
        adql
    }
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
