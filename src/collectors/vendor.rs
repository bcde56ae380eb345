use crate::collectors::command;
use crate::collectors::pci::PciAddress;
use crate::error::ProbeError;
use log::debug;
use serde_json::{Map, Value};
use std::time::Duration;

/// Vendor HBA utilities that print an adapter list and then per-adapter
/// `key : value` details.
const IRCU_TOOLS: &[&str] = &["sas3ircu", "sas2ircu"];

/// Vendor utilities with JSON inventory output.
const JSON_TOOLS: &[&str] = &["storcli64", "storcli"];

/// Ask the installed vendor utilities for the controller's lane count.
/// The first tool that reports a nonzero count wins.
pub async fn phy_count(addr: &PciAddress, timeout: Duration) -> Option<usize> {
    for tool in IRCU_TOOLS {
        match ircu_phy_count(tool, addr, timeout).await {
            Ok(Some(n)) if n > 0 => return Some(n),
            Ok(_) => {}
            Err(e) => debug!("{}: {} probe failed: {}", addr, tool, e),
        }
    }

    for tool in JSON_TOOLS {
        match storcli_phy_count(tool, addr, timeout).await {
            Ok(Some(n)) if n > 0 => return Some(n),
            Ok(_) => {}
            Err(e) => debug!("{}: {} probe failed: {}", addr, tool, e),
        }
    }

    None
}

async fn ircu_phy_count(
    tool: &str,
    addr: &PciAddress,
    timeout: Duration,
) -> Result<Option<usize>, ProbeError> {
    let list = command::run(tool, &["LIST"], timeout).await?;
    let Some(index) = ircu_adapter_index(&list, addr) else {
        return Ok(None);
    };

    let display = command::run(tool, &[index.as_str(), "DISPLAY"], timeout).await?;
    Ok(max_phy_count(&key_value_tree(&display)))
}

async fn storcli_phy_count(
    tool: &str,
    addr: &PciAddress,
    timeout: Duration,
) -> Result<Option<usize>, ProbeError> {
    let output = command::run(tool, &["/call", "show", "all", "J"], timeout).await?;
    let inventory: Value = serde_json::from_str(&output)?;
    Ok(controller_in_inventory(&inventory, addr).and_then(max_phy_count))
}

/// Adapter index of `addr` in a `sasXircu LIST` table.
///
/// Rows look like `  0  SAS3008  1000h  97h  00h:03h:00h:00h  1000h  3090h`.
pub fn ircu_adapter_index(list: &str, addr: &PciAddress) -> Option<String> {
    list.lines().find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let index = fields.first()?;
        if !index.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        fields
            .iter()
            .any(|f| f.matches(':').count() >= 2 && addr.matches_vendor_format(f))
            .then(|| index.to_string())
    })
}

/// Turn `key : value` report lines into a JSON array of one-field objects,
/// so the same tree search serves text and JSON tools.
pub fn key_value_tree(text: &str) -> Value {
    let rows = text
        .lines()
        .filter_map(|line| {
            let (key, value) = line.split_once(':')?;
            let key = key.trim();
            let value = value.trim();
            if key.is_empty() || value.is_empty() {
                return None;
            }
            let value = match value.parse::<u64>() {
                Ok(n) => Value::from(n),
                Err(_) => Value::from(value),
            };
            let mut row = Map::new();
            row.insert(key.to_string(), value);
            Some(Value::Object(row))
        })
        .collect();
    Value::Array(rows)
}

/// The controller object in a storcli inventory whose PCI address is `addr`.
pub fn controller_in_inventory<'a>(inventory: &'a Value, addr: &PciAddress) -> Option<&'a Value> {
    inventory
        .get("Controllers")?
        .as_array()?
        .iter()
        .find(|c| mentions_address(c, addr))
}

fn mentions_address(value: &Value, addr: &PciAddress) -> bool {
    match value {
        Value::Object(map) => map.iter().any(|(k, v)| {
            let is_pci_field = k.to_ascii_lowercase().contains("pci address");
            match v {
                Value::String(s) if is_pci_field => addr.matches_vendor_format(s),
                _ => mentions_address(v, addr),
            }
        }),
        Value::Array(items) => items.iter().any(|v| mentions_address(v, addr)),
        _ => false,
    }
}

/// Largest numeric value stored under any key that mentions "phy".
pub fn max_phy_count(value: &Value) -> Option<usize> {
    let mut best: Option<u64> = None;
    collect_phy_values(value, &mut best);
    best.filter(|&n| n > 0).map(|n| n as usize)
}

fn collect_phy_values(value: &Value, best: &mut Option<u64>) {
    match value {
        Value::Object(map) => {
            for (key, v) in map {
                if key.to_ascii_lowercase().contains("phy") {
                    let n = match v {
                        Value::Number(n) => n.as_u64(),
                        Value::String(s) => s.trim().parse().ok(),
                        _ => None,
                    };
                    if let Some(n) = n {
                        *best = Some(best.map_or(n, |b| b.max(n)));
                    }
                }
                collect_phy_values(v, best);
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect_phy_values(v, best)),
        _ => {}
    }
}
