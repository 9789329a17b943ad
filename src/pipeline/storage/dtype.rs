use std::fmt;

use crate::types::CanonicalType;

/// Warehouse column types the loader emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WarehouseType {
    BigInt,
    DoublePrecision,
    Boolean,
    Text,
}

impl WarehouseType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            WarehouseType::BigInt => "BIGINT",
            WarehouseType::DoublePrecision => "DOUBLE PRECISION",
            WarehouseType::Boolean => "BOOLEAN",
            WarehouseType::Text => "TEXT",
        }
    }
}

impl fmt::Display for WarehouseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Map a canonical type onto its warehouse column type.
///
/// No wildcard arm: adding a `CanonicalType` variant must fail to compile here.
pub fn warehouse_type(canonical: CanonicalType) -> WarehouseType {
    match canonical {
        CanonicalType::Integer => WarehouseType::BigInt,
        CanonicalType::Float => WarehouseType::DoublePrecision,
        CanonicalType::Boolean => WarehouseType::Boolean,
        CanonicalType::Text => WarehouseType::Text,
        CanonicalType::Category => WarehouseType::Text,
        CanonicalType::Timestamp => WarehouseType::Text,
    }
}
