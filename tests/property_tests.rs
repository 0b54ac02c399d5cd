//! Property-based tests for distribution, numbering and the status table.

use std::collections::HashMap;

use chrono::NaiveDate;
use medsupply_api::{
    models::OrderStatus,
    services::{
        catalog::{CatalogItem, LinkedWarehouse},
        distribution::{plan_distribution, RequestedItem},
        order_number::format_order_number,
    },
};
use proptest::prelude::*;
use uuid::Uuid;

fn warehouses(count: usize) -> Vec<LinkedWarehouse> {
    (0..count)
        .map(|i| LinkedWarehouse {
            warehouse_id: Uuid::new_v4(),
            name: format!("Warehouse {i}"),
            code: format!("WH{i}"),
            priority: i as i32 + 1,
            is_primary: i == 0,
        })
        .collect()
}

fn status_strategy() -> impl Strategy<Value = OrderStatus> {
    prop_oneof![
        Just(OrderStatus::Pending),
        Just(OrderStatus::Approved),
        Just(OrderStatus::Rejected),
        Just(OrderStatus::Preparing),
        Just(OrderStatus::Ready),
        Just(OrderStatus::Delivered),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Every item lands in exactly the group of the warehouse stocking it.
    #[test]
    fn distribution_partitions_the_request(
        warehouse_count in 1usize..5,
        lines in prop::collection::vec((0usize..5, 1i32..500), 1..12),
    ) {
        let linked = warehouses(warehouse_count);
        let mut catalog: HashMap<String, Vec<CatalogItem>> = HashMap::new();
        let mut items = Vec::new();
        let mut owner = HashMap::new();

        for (i, (slot, quantity)) in lines.iter().enumerate() {
            let wh = &linked[slot % warehouse_count];
            let name = format!("item-{i}");
            catalog.insert(name.clone(), vec![CatalogItem {
                item_id: Uuid::new_v4(),
                name: name.clone(),
                warehouse_id: wh.warehouse_id,
                warehouse_name: wh.name.clone(),
                is_active: true,
                unit: None,
            }]);
            owner.insert(name.clone(), wh.warehouse_id);
            items.push(RequestedItem::new(name, *quantity));
        }

        let groups = plan_distribution(&linked, &items, &catalog).unwrap();

        let total: usize = groups.iter().map(|g| g.items.len()).sum();
        prop_assert_eq!(total, items.len());
        for group in &groups {
            prop_assert!(!group.items.is_empty());
            for item in &group.items {
                prop_assert_eq!(owner[&item.item_name], group.warehouse.warehouse_id);
            }
        }
        let priorities: Vec<i32> = groups.iter().map(|g| g.warehouse.priority).collect();
        let mut sorted = priorities.clone();
        sorted.sort_unstable();
        prop_assert_eq!(priorities, sorted);
    }

    #[test]
    fn order_numbers_encode_day_and_sequence(
        days in 0i64..20_000,
        sequence in 1u64..10_000,
    ) {
        let day = NaiveDate::from_ymd_opt(1990, 1, 1).unwrap() + chrono::Duration::days(days);
        let number = format_order_number(day, sequence);

        let parts: Vec<&str> = number.split('-').collect();
        prop_assert_eq!(parts.len(), 3);
        prop_assert_eq!(parts[0], "ORD");
        prop_assert_eq!(NaiveDate::parse_from_str(parts[1], "%Y%m%d").unwrap(), day);
        prop_assert_eq!(parts[2].len(), 4);
        prop_assert_eq!(parts[2].parse::<u64>().unwrap(), sequence);
    }

    /// Terminal statuses have no way out; everything else has one.
    #[test]
    fn status_table_is_acyclic(from in status_strategy(), to in status_strategy()) {
        if from.can_transition_to(to) {
            prop_assert!(!to.can_transition_to(from));
            prop_assert!(!from.is_terminal());
            prop_assert_ne!(to, OrderStatus::Pending);
        }
    }
}
