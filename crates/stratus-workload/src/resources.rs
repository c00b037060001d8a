//! Container resource requirements

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

/// Millicores granted per CPU weight point
pub const MILLICORES_PER_WEIGHT: i64 = 10;

/// CPU weight (0-100) as a millicore quantity
pub fn cpu_millicores(weight: u8) -> Quantity {
    Quantity(format!("{}m", i64::from(weight) * MILLICORES_PER_WEIGHT))
}

/// Megabytes as a decimal quantity
pub fn megabytes(mb: i64) -> Quantity {
    Quantity(format!("{mb}M"))
}

/// Memory and disk limits; memory and cpu requests
pub fn container_resources(cpu_weight: u8, memory_mb: i64, disk_mb: i64) -> ResourceRequirements {
    let memory = megabytes(memory_mb);

    ResourceRequirements {
        limits: Some(BTreeMap::from([
            ("memory".to_string(), memory.clone()),
            ("ephemeral-storage".to_string(), megabytes(disk_mb)),
        ])),
        requests: Some(BTreeMap::from([
            ("memory".to_string(), memory),
            ("cpu".to_string(), cpu_millicores(cpu_weight)),
        ])),
        ..Default::default()
    }
}

/// Megabytes from a quantity written by [`megabytes`]
pub fn parse_megabytes(q: &Quantity) -> Option<i64> {
    q.0.strip_suffix('M')?.parse().ok()
}

/// CPU weight from a quantity written by [`cpu_millicores`]
pub fn parse_cpu_weight(q: &Quantity) -> Option<u8> {
    let millis: i64 = q.0.strip_suffix('m')?.parse().ok()?;
    u8::try_from(millis / MILLICORES_PER_WEIGHT).ok()
}
