//! Resource quantities in the units descriptors use
pub use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

/// `mb` megabytes, in the orchestrator's decimal mega unit
pub fn megabytes(mb: i64) -> Quantity {
    Quantity(format!("{mb}M"))
}

/// CPU request for a relative `weight`, ten millicores per point
pub fn millicores(weight: u8) -> Quantity {
    Quantity(format!("{}m", u32::from(weight) * 10))
}

/// Read a memory or disk quantity back as whole megabytes
///
/// Accepts the decimal and binary suffixes the API server may normalise a
/// quantity to. Returns `None` for anything that is not a plain number with an
/// optional suffix.
pub fn to_megabytes(quantity: &Quantity) -> Option<i64> {
    let raw = quantity.0.trim();
    let split = raw.find(|c: char| c.is_alphabetic()).unwrap_or(raw.len());
    let value = raw[..split].parse::<f64>().ok()?;
    let bytes_per_unit: f64 = match &raw[split..] {
        "" => 1.0,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "Ki" => 1024.0,
        "Mi" => 1024.0 * 1024.0,
        "Gi" => 1024.0 * 1024.0 * 1024.0,
        "Ti" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        _ => return None,
    };
    #[allow(clippy::cast_possible_truncation)]
    Some((value * bytes_per_unit / 1e6).round() as i64)
}
