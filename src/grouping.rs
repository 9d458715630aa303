use rayon::prelude::*;
use std::collections::BTreeMap;

use crate::errors::Result;
use crate::models::{Dated, GroupKey};

/// Partition rows by (year, field_id), each group sorted ascending by date.
pub fn group_rows<T: Dated>(rows: Vec<T>) -> BTreeMap<GroupKey, Vec<T>> {
    let mut groups: BTreeMap<GroupKey, Vec<T>> = BTreeMap::new();
    for row in rows {
        groups.entry(row.group_key()).or_default().push(row);
    }
    for group in groups.values_mut() {
        group.sort_by_key(|r| r.date());
    }
    groups
}

/// Run `f` over every group in parallel and concatenate the results in
/// group-key order. The first failing group aborts the whole run.
pub fn par_map_groups<T, U, F>(groups: BTreeMap<GroupKey, Vec<T>>, f: F) -> Result<Vec<U>>
where
    T: Send,
    U: Send,
    F: Fn(&GroupKey, Vec<T>) -> Result<Vec<U>> + Sync + Send,
{
    let mapped: Vec<Vec<U>> = groups
        .into_iter()
        .collect::<Vec<_>>()
        .into_par_iter()
        .map(|(key, rows)| f(&key, rows))
        .collect::<Result<Vec<_>>>()?;
    Ok(mapped.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Observation;
    use chrono::NaiveDate;

    fn obs(y: i32, m: u32, d: u32, field: &str) -> Observation {
        Observation {
            date: NaiveDate::from_ymd_opt(y, m, d).unwrap(),
            field_id: field.to_string(),
            ndvi: Some(0.5),
        }
    }

    #[test]
    fn test_groups_split_by_year_and_sorted() {
        let rows = vec![
            obs(2021, 6, 3, "a"),
            obs(2020, 6, 1, "a"),
            obs(2021, 5, 1, "a"),
            obs(2021, 5, 2, "b"),
        ];
        let groups = group_rows(rows);
        assert_eq!(groups.len(), 3);

        let a21 = &groups[&GroupKey::new(2021, "a")];
        assert_eq!(a21.len(), 2);
        assert!(a21[0].date < a21[1].date);
    }

    #[test]
    fn test_par_map_preserves_key_order() {
        let rows = vec![obs(2021, 1, 1, "b"), obs(2020, 1, 1, "z"), obs(2021, 1, 1, "a")];
        let out = par_map_groups(group_rows(rows), |key, _| Ok(vec![key.clone()])).unwrap();
        assert_eq!(
            out,
            vec![
                GroupKey::new(2020, "z"),
                GroupKey::new(2021, "a"),
                GroupKey::new(2021, "b"),
            ]
        );
    }
}
