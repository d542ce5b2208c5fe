/*!
 * Batch slicing and request grouping.
 *
 * A batch is a fixed-size slice of the subtitle list, selected by 0-based
 * index. Contiguous selected batches share one request, except when every
 * batch is selected: then each batch gets its own request so that a single
 * call never covers the whole file.
 */

use std::collections::BTreeSet;
use std::ops::Range;

/// Number of batches needed for `total_items`
pub fn batch_count(total_items: usize, batch_size: usize) -> usize {
    total_items.div_ceil(batch_size.max(1))
}

/// Item range covered by batch `index`, clamped to the list
pub fn batch_range(index: usize, batch_size: usize, total_items: usize) -> Range<usize> {
    let batch_size = batch_size.max(1);
    let start = (index * batch_size).min(total_items);
    let end = ((index + 1) * batch_size).min(total_items);
    start..end
}

/// Item range covered by a group of contiguous batches
pub fn group_range(group: &[usize], batch_size: usize, total_items: usize) -> Range<usize> {
    match (group.first(), group.last()) {
        (Some(&first), Some(&last)) => {
            batch_range(first, batch_size, total_items).start..batch_range(last, batch_size, total_items).end
        }
        _ => 0..0,
    }
}

/// Group selected batch indices into requests.
///
/// Indices are deduplicated and sorted; indices outside `0..total_batches`
/// are ignored.
pub fn group_selected_batches(selected: &[usize], total_batches: usize) -> Vec<Vec<usize>> {
    let selected: BTreeSet<usize> = selected.iter().copied().filter(|&i| i < total_batches).collect();
    if selected.is_empty() {
        return Vec::new();
    }

    if selected.len() == total_batches {
        return selected.into_iter().map(|i| vec![i]).collect();
    }

    let mut groups: Vec<Vec<usize>> = Vec::new();
    for index in selected {
        match groups.last_mut() {
            Some(group) if group.last().is_some_and(|&last| last + 1 == index) => group.push(index),
            _ => groups.push(vec![index]),
        }
    }
    groups
}

/// Parse a selection such as `0,1,5` or `2-4,7`
pub fn parse_selection(raw: &str) -> anyhow::Result<Vec<usize>> {
    let mut selected = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.split_once('-') {
            Some((from, to)) => {
                let from: usize = from.trim().parse()?;
                let to: usize = to.trim().parse()?;
                if from > to {
                    anyhow::bail!("Invalid batch range: {}", part);
                }
                selected.extend(from..=to);
            }
            None => selected.push(part.parse()?),
        }
    }
    Ok(selected)
}
