//! Integration tests for stash_inventory
//!
//! Tests adding, removing, editing, transfers, extensions, change feeds and snapshots

use std::any::Any;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use stash_inventory::prelude::*;

fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .is_test(true)
        .try_init();
}

fn gold() -> ItemRef {
    Item::new("gold", "Gold Coin").into_ref()
}

fn arrows() -> ItemRef {
    Item::new("arrow", "Arrow").with_max_stack(10).into_ref()
}

fn counts(storage: &ItemStorage, key: EntryKey) -> Vec<i32> {
    storage.get_stacks_in_entry(key).iter().map(|stack| stack.count).collect()
}

#[test]
fn test_add_folds_into_existing_entry() {
    init_logging();
    let mut storage = ItemStorage::new();
    let gold = gold();

    let first = storage.add_item_stack(ItemStack::new(gold.clone(), 5), AddStackBehavior::AddToAnyStack);
    let second = storage.add_item_stack(ItemStack::new(gold.clone(), 3), AddStackBehavior::AddToAnyStack);

    assert_eq!(first, second);
    assert_eq!(storage.entry_count(), 1);
    assert_eq!(storage.entry_amount(first), 8);
    assert_eq!(counts(&storage, first), vec![8]);

    let address = storage.get_first_address().unwrap();
    assert!(storage.remove_stack(address, &tags::REMOVAL_DELETION, 8));

    assert!(!storage.contains_key(first));
    assert!(storage.is_empty());
}

#[test]
fn test_first_key_follows_baseline() {
    let mut storage = ItemStorage::new();
    let key = storage.add_item_stack(ItemStack::single(gold()), AddStackBehavior::AddToAnyStack);
    assert_eq!(key, EntryKey::new(101));

    let config = StorageConfig {
        key_baseline: 1000,
        ..Default::default()
    };
    let mut storage = ItemStorage::with_config(config);
    let key = storage.add_item_stack(ItemStack::single(gold()), AddStackBehavior::AddToAnyStack);
    assert_eq!(key, EntryKey::new(1001));
}

#[test]
fn test_add_respects_stack_limit() {
    let mut storage = ItemStorage::new();

    let key = storage.add_item_stack(ItemStack::new(arrows(), 25), AddStackBehavior::AddToAnyStack);
    assert_eq!(counts(&storage, key), vec![10, 10, 5]);

    storage.add_item_stack(ItemStack::new(arrows(), 7), AddStackBehavior::AddToAnyStack);
    assert_eq!(counts(&storage, key), vec![10, 10, 10, 2]);

    storage.add_item_stack(ItemStack::new(arrows(), 3), AddStackBehavior::OnlyNewStacks);
    assert_eq!(counts(&storage, key), vec![10, 10, 10, 2, 3]);
    assert_eq!(storage.stack_count(), 5);
}

#[test]
fn test_split_stack() {
    let mut storage = ItemStorage::new();
    let key = storage.add_item_stack(ItemStack::new(arrows(), 20), AddStackBehavior::AddToAnyStack);
    assert_eq!(counts(&storage, key), vec![10, 10]);

    let source = storage.get_addresses_for_entry(key)[0];
    let created = storage.try_split_stack(source, 4).unwrap();

    assert_eq!(counts(&storage, key), vec![6, 10, 4]);
    assert_eq!(storage.stack_amount(created), 4);
    assert_eq!(created.entry(), key);
}

#[test]
fn test_split_needs_a_remainder() {
    let mut storage = ItemStorage::new();
    let key = storage.add_item_stack(ItemStack::new(arrows(), 6), AddStackBehavior::AddToAnyStack);
    let address = storage.get_first_address().unwrap();

    assert_eq!(storage.try_split_stack(address, 6), Err(StorageError::InvalidAmount(6)));
    assert_eq!(storage.try_split_stack(address, 0), Err(StorageError::InvalidAmount(0)));
    assert!(!storage.split_stack(address, -1));
    assert_eq!(counts(&storage, key), vec![6]);
}

#[test]
fn test_merge_stacks_bounded_by_limit() {
    let mut storage = ItemStorage::new();
    let key = storage.add_item_stack(ItemStack::new(arrows(), 8), AddStackBehavior::AddToAnyStack);
    storage.add_item_stack(ItemStack::new(arrows(), 3), AddStackBehavior::OnlyNewStacks);

    let keys = storage.break_entry_into_keys(key);
    let (a, b) = (keys[0], keys[1]);

    let moved = storage.try_merge_stacks(key, b, a, 3).unwrap();

    assert_eq!(moved, 2);
    assert_eq!(counts(&storage, key), vec![10, 1]);

    let err = storage.try_merge_stacks(key, b, a, 1).unwrap_err();
    assert_eq!(err, StorageError::StackFull(Address::encode(key, a)));
    assert!(err.is_validation());
}

#[test]
fn test_merge_drains_source_stack() {
    let mut storage = ItemStorage::new();
    let key = storage.add_item_stack(ItemStack::new(arrows(), 4), AddStackBehavior::AddToAnyStack);
    storage.add_item_stack(ItemStack::new(arrows(), 3), AddStackBehavior::OnlyNewStacks);
    let keys = storage.break_entry_into_keys(key);

    assert!(storage.merge_stacks(key, keys[1], keys[0], ENTIRE_STACK));

    assert_eq!(counts(&storage, key), vec![7]);
    assert!(!storage.contains_address(Address::encode(key, keys[1])));
}

#[test]
fn test_partial_removal_takes_from_newest_stack() {
    let mut storage = ItemStorage::new();
    let key = storage.add_item_stack(ItemStack::new(arrows(), 15), AddStackBehavior::AddToAnyStack);

    let taken = storage.take_entry(key, &tags::REMOVAL_DELETION, 3).unwrap();

    assert_eq!(taken.copies, 3);
    assert_eq!(counts(&storage, key), vec![10, 2]);
}

#[test]
fn test_over_request_removes_what_exists() {
    let mut storage = ItemStorage::new();
    let key = storage.add_item_stack(ItemStack::new(arrows(), 15), AddStackBehavior::AddToAnyStack);
    let last = storage.get_addresses_for_entry(key)[1];

    let taken = storage.take_stack(last, &tags::REMOVAL_DELETION, 50).unwrap();
    assert_eq!(taken.copies, 5);

    let taken = storage.take_entry(key, &tags::REMOVAL_DELETION, 100).unwrap();
    assert_eq!(taken.copies, 10);
    assert!(storage.is_empty());
}

#[test]
fn test_invalid_requests_are_validation_errors() {
    init_logging();
    let mut storage = ItemStorage::new();
    let key = storage.add_item_stack(ItemStack::new(gold(), 4), AddStackBehavior::AddToAnyStack);

    let errors = vec![
        storage.try_take_entry(EntryKey::INVALID, &tags::REMOVAL_DELETION, 1).unwrap_err(),
        storage.try_take_entry(key, &tags::REMOVAL_DELETION, 0).unwrap_err(),
        storage.try_take_entry(key, &tags::REMOVAL_DELETION, -2).unwrap_err(),
        storage.try_take_entry(key, &tags::EDIT_MERGE, 1).unwrap_err(),
        storage.try_take_entry(EntryKey::new(999), &tags::REMOVAL_DELETION, 1).unwrap_err(),
        storage
            .try_take_stack(Address::encode(key, StackKey::new(999)), &tags::REMOVAL_DELETION, 1)
            .unwrap_err(),
        storage.try_take_stack(Address::NONE, &tags::REMOVAL_DELETION, 1).unwrap_err(),
        storage
            .try_add_item_stack(ItemStack::new(gold(), 0), AddStackBehavior::AddToAnyStack)
            .unwrap_err(),
        storage
            .try_add_item_stack(ItemStack::single(Item::new("", "Nothing").into_ref()), AddStackBehavior::AddToAnyStack)
            .unwrap_err(),
    ];

    for err in &errors {
        assert!(err.is_validation(), "{:?} should be a validation error", err);
        assert!(!err.is_denied());
    }

    assert!(matches!(errors[3], StorageError::InvalidTag { .. }));
    assert_eq!(storage.entry_amount(key), 4);
}

#[test]
fn test_unlisted_removal_reason_is_denied_by_default() {
    let mut storage = ItemStorage::new();
    let key = storage.add_item_stack(ItemStack::new(gold(), 4), AddStackBehavior::AddToAnyStack);

    let err = storage.try_take_entry(key, &tags::REMOVAL_EJECTION, 1).unwrap_err();
    assert!(err.is_denied());
    assert!(!storage.can_remove_entry(key, &tags::REMOVAL_EJECTION));

    storage
        .add_extension(Box::new(RemovalGuardExtension::new().allow_removal(tags::REMOVAL_EJECTION)))
        .unwrap();

    assert!(storage.can_remove_entry(key, &tags::REMOVAL_EJECTION));
    assert!(storage.remove_entry(key, &tags::REMOVAL_EJECTION, 1));
    assert_eq!(storage.entry_amount(key), 3);
}

#[test]
fn test_extension_denies_removal_and_edit() {
    let mut storage = ItemStorage::new().with_extension(
        RemovalGuardExtension::new()
            .deny_removal(tags::REMOVAL_DELETION)
            .deny_edit(tags::EDIT_SPLIT),
    );
    let key = storage.add_item_stack(ItemStack::new(arrows(), 8), AddStackBehavior::AddToAnyStack);
    let address = storage.get_first_address().unwrap();

    let err = storage.try_take_entry(key, &tags::REMOVAL_DELETION, 1).unwrap_err();
    assert_eq!(err, StorageError::denied(DeniedOperation::Removal, tags::REMOVAL_DELETION));

    let err = storage.try_split_stack(address, 2).unwrap_err();
    assert!(err.is_denied());
    assert!(!storage.can_edit_stack(address, &tags::EDIT_SPLIT));
    assert!(storage.can_edit_entry(key, &tags::EDIT_MERGE));

    assert_eq!(counts(&storage, key), vec![8]);
}

#[test]
fn test_move_stack_between_storages() {
    let mut source = ItemStorage::new();
    let mut target = ItemStorage::new();
    let key = source.add_item_stack(ItemStack::new(arrows(), 15), AddStackBehavior::AddToAnyStack);
    let address = source.get_first_address().unwrap();

    let landed = source.move_stack(&mut target, address, 4, AddStackBehavior::AddToAnyStack);

    assert!(landed.is_valid());
    assert_eq!(source.entry_amount(key), 11);
    assert_eq!(target.entry_amount(landed), 4);
    assert_ne!(source.container_id(), target.container_id());
}

#[test]
fn test_move_refused_by_target_leaves_source_untouched() {
    let mut source = ItemStorage::new();
    let mut target = ItemStorage::new().with_extension(ItemLimitExtension::new(0, 3));
    let key = source.add_item_stack(ItemStack::new(arrows(), 15), AddStackBehavior::AddToAnyStack);
    let address = source.get_first_address().unwrap();

    let err = source
        .try_move_stack(&mut target, address, ENTIRE_STACK, AddStackBehavior::AddToAnyStack)
        .unwrap_err();

    assert!(err.is_denied());
    assert_eq!(source.entry_amount(key), 15);
    assert!(target.is_empty());

    let landed = source.move_stack(&mut target, address, 3, AddStackBehavior::AddToAnyStack);
    assert_eq!(target.entry_amount(landed), 3);
    assert_eq!(source.entry_amount(key), 12);
}

/// Says yes to the first addition it is asked about and no afterwards
struct ChangesMind {
    asked: AtomicU32,
}

impl Extension for ChangesMind {
    fn identifier(&self) -> ExtensionId {
        ExtensionId::from_name("test.changes_mind")
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn allows_addition(&self, _: &dyn ItemContainer, _: &[ItemStack], _: AdditionArgs) -> ExtensionResponse {
        if self.asked.fetch_add(1, Ordering::SeqCst) == 0 {
            ExtensionResponse::NoExplicitResponse
        } else {
            ExtensionResponse::Disallowed
        }
    }
}

/// Counts addition hooks
#[derive(Default)]
struct AdditionCounter {
    pre: Arc<AtomicU32>,
    post: Arc<AtomicU32>,
}

impl Extension for AdditionCounter {
    fn identifier(&self) -> ExtensionId {
        ExtensionId::from_name("test.addition_counter")
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn pre_addition(&mut self, _: &dyn ItemContainer, _: &ItemStack) {
        self.pre.fetch_add(1, Ordering::SeqCst);
    }

    fn post_addition(&mut self, _: &dyn ItemContainer, _: &EventLog) {
        self.post.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_refused_transfer_comes_back_as_addition() {
    init_logging();
    let counter = AdditionCounter::default();
    let (pre, post) = (counter.pre.clone(), counter.post.clone());

    let mut source = ItemStorage::new().with_extension(counter);
    let mut target = ItemStorage::new().with_extension(ChangesMind { asked: AtomicU32::new(0) });
    let key = source.add_item_stack(ItemStack::new(arrows(), 15), AddStackBehavior::AddToAnyStack);
    assert_eq!((pre.load(Ordering::SeqCst), post.load(Ordering::SeqCst)), (1, 1));

    let address = source.get_first_address().unwrap();
    let err = source
        .try_move_stack(&mut target, address, 4, AddStackBehavior::AddToAnyStack)
        .unwrap_err();

    assert!(err.is_denied());
    assert!(target.is_empty());
    assert_eq!(source.entry_amount(key), 15);
    assert_eq!((pre.load(Ordering::SeqCst), post.load(Ordering::SeqCst)), (2, 2));
}

#[test]
fn test_exhausted_keys_refuse_new_entries() {
    let config = StorageConfig {
        key_baseline: i32::MAX - 1,
        ..StorageConfig::default()
    };
    let mut full = ItemStorage::with_config(config);
    let coins = full.add_item_stack(ItemStack::new(gold(), 5), AddStackBehavior::AddToAnyStack);
    assert_eq!(coins, EntryKey::new(i32::MAX));

    let receiver = full.change_channel();
    let err = full
        .try_add_item_stack(ItemStack::new(arrows(), 3), AddStackBehavior::AddToAnyStack)
        .unwrap_err();
    assert_eq!(err, StorageError::KeysExhausted(i32::MAX));
    assert!(!err.is_denied());
    assert_eq!(full.entry_count(), 1);
    assert_eq!(receiver.try_iter().count(), 0);

    // Existing entries still grow
    assert_eq!(full.add_item_stack(ItemStack::new(gold(), 5), AddStackBehavior::AddToAnyStack), coins);
    assert_eq!(full.entry_amount(coins), 10);

    // A transfer into the full storage is refused before the source is touched
    let mut source = ItemStorage::new();
    let key = source.add_item_stack(ItemStack::new(arrows(), 12), AddStackBehavior::AddToAnyStack);
    assert!(source.try_move_entry(&mut full, key, AddStackBehavior::AddToAnyStack).is_err());
    assert_eq!(source.entry_amount(key), 12);
    assert_eq!(source.dump(&mut full), 0);
    assert_eq!(source.entry_amount(key), 12);
}

#[test]
fn test_move_entry() {
    let mut source = ItemStorage::new();
    let mut target = ItemStorage::new();
    let gold = gold();
    let key = source.add_item_stack(ItemStack::new(gold.clone(), 9), AddStackBehavior::AddToAnyStack);
    target.add_item_stack(ItemStack::new(gold.clone(), 1), AddStackBehavior::AddToAnyStack);

    let landed = source.move_entry(&mut target, key, AddStackBehavior::AddToAnyStack);

    assert!(!source.contains_key(key));
    assert_eq!(target.entry_count(), 1);
    assert_eq!(target.entry_amount(landed), 10);
}

#[test]
fn test_dump() {
    init_logging();
    let mut source = ItemStorage::new();
    let mut target = ItemStorage::new();
    source.add_item_stack(ItemStack::new(gold(), 5), AddStackBehavior::AddToAnyStack);
    source.add_item_stack(ItemStack::new(arrows(), 12), AddStackBehavior::AddToAnyStack);

    assert_eq!(source.dump(&mut target), 2);

    assert!(source.is_empty());
    let gold_key = target.find_item(&gold(), ItemEqualsCheck::UseCompareWith).unwrap();
    let arrow_key = target.find_item(&arrows(), ItemEqualsCheck::UseCompareWith).unwrap();
    assert_eq!(target.entry_amount(gold_key), 5);
    assert_eq!(target.entry_amount(arrow_key), 12);
}

#[test]
fn test_dump_keeps_what_target_refuses() {
    let mut source = ItemStorage::new();
    let mut target = ItemStorage::new().with_extension(ItemLimitExtension::new(1, 0));
    source.add_item_stack(ItemStack::new(gold(), 5), AddStackBehavior::AddToAnyStack);
    let arrow_key = source.add_item_stack(ItemStack::new(arrows(), 12), AddStackBehavior::AddToAnyStack);

    assert_eq!(source.dump(&mut target), 1);

    assert_eq!(target.entry_count(), 1);
    assert_eq!(source.get_all_keys(), vec![arrow_key]);
    assert_eq!(source.entry_amount(arrow_key), 12);
}

#[test]
fn test_clear_never_reuses_keys() {
    let mut storage = ItemStorage::new();
    let first = storage.add_item_stack(ItemStack::new(gold(), 2), AddStackBehavior::AddToAnyStack);
    storage.add_item_stack(ItemStack::new(arrows(), 2), AddStackBehavior::AddToAnyStack);

    assert_eq!(storage.clear(&tags::REMOVAL_DELETION), 2);
    assert!(storage.is_empty());

    let next = storage.add_item_stack(ItemStack::new(gold(), 2), AddStackBehavior::AddToAnyStack);
    assert!(next > first);
    assert!(!storage.contains_key(first));
}

#[test]
fn test_clear_may_reset_keys_when_configured() {
    let config = StorageConfig {
        reset_keys_on_clear: true,
        ..Default::default()
    };
    let mut storage = ItemStorage::with_config(config);
    let first = storage.add_item_stack(ItemStack::new(gold(), 2), AddStackBehavior::AddToAnyStack);

    storage.clear(&tags::REMOVAL_DELETION);

    let next = storage.add_item_stack(ItemStack::new(gold(), 2), AddStackBehavior::AddToAnyStack);
    assert_eq!(next, first);
}

#[test]
fn test_clear_skips_denied_entries() {
    let mut storage = ItemStorage::new().with_extension(RemovalGuardExtension::new().deny_removal(tags::REMOVAL_DELETION));
    storage.add_item_stack(ItemStack::new(gold(), 2), AddStackBehavior::AddToAnyStack);

    // Non-removal reasons count as deletion
    assert_eq!(storage.clear(&tags::ADDITION), 0);
    assert_eq!(storage.entry_count(), 1);

    assert_eq!(storage.clear(&tags::REMOVAL_MOVING), 1);
    assert!(storage.is_empty());
}

#[test]
fn test_change_feed_order() {
    let mut storage = ItemStorage::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = seen.clone();
    storage.subscribe_changes(move |changes| seen_clone.lock().extend_from_slice(changes));

    let key = storage.add_item_stack(ItemStack::new(arrows(), 15), AddStackBehavior::AddToAnyStack);
    storage.take_entry(key, &tags::REMOVAL_DELETION, ENTIRE_STACK);

    let kinds: Vec<ChangeKind> = seen.lock().iter().map(|change| change.kind).collect();
    assert_eq!(
        kinds,
        vec![ChangeKind::Added, ChangeKind::Added, ChangeKind::Removed, ChangeKind::Removed]
    );
    assert!(seen.lock().iter().all(|change| change.address.entry() == key));
}

#[test]
fn test_change_feed_updates_on_partial_change() {
    let mut storage = ItemStorage::new();
    let key = storage.add_item_stack(ItemStack::new(arrows(), 15), AddStackBehavior::AddToAnyStack);
    let receiver = storage.change_channel();

    storage.take_entry(key, &tags::REMOVAL_DELETION, 2);

    let changes: Vec<StorageChange> = receiver.try_iter().collect();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].kind, ChangeKind::Updated);
    assert_eq!(changes[0].address, storage.get_addresses_for_entry(key)[1]);
}

#[test]
fn test_change_subscribers_by_priority() {
    let mut storage = ItemStorage::new();
    let order = Arc::new(Mutex::new(Vec::new()));

    let low = order.clone();
    storage.subscribe_changes_with_priority(move |_| low.lock().push("low"), Priority::Low);
    let high = order.clone();
    let id = storage.subscribe_changes_with_priority(move |_| high.lock().push("high"), Priority::High);

    storage.add_entry_from_item(gold(), AddStackBehavior::AddToAnyStack);
    assert_eq!(*order.lock(), vec!["high", "low"]);

    assert!(storage.unsubscribe_changes(id));
    storage.add_entry_from_item(gold(), AddStackBehavior::AddToAnyStack);
    assert_eq!(*order.lock(), vec!["high", "low", "low"]);
}

#[test]
fn test_manual_sync() {
    let config = StorageConfig {
        auto_sync_changes: false,
        ..Default::default()
    };
    let mut storage = ItemStorage::with_config(config);
    let receiver = storage.change_channel();

    storage.add_item_stack(ItemStack::new(arrows(), 12), AddStackBehavior::AddToAnyStack);

    assert_eq!(storage.pending_changes(), 2);
    assert!(receiver.try_recv().is_err());

    assert_eq!(storage.sync_changes(), 2);
    assert_eq!(storage.pending_changes(), 0);
    assert_eq!(receiver.try_iter().count(), 2);
}

#[test]
fn test_item_limit_max_entries() {
    let mut storage = ItemStorage::new().with_extension(ItemLimitExtension::new(2, 0));

    assert!(storage.add_entry_from_item(gold(), AddStackBehavior::AddToAnyStack));
    assert!(storage.add_entry_from_item(arrows(), AddStackBehavior::AddToAnyStack));

    let err = storage
        .try_add_item_stack(ItemStack::single(Item::new("gem", "Gem").into_ref()), AddStackBehavior::AddToAnyStack)
        .unwrap_err();
    assert_eq!(err, StorageError::denied(DeniedOperation::Addition, tags::ADDITION));

    // Existing entries still grow
    assert!(storage.add_entry_from_item(gold(), AddStackBehavior::AddToAnyStack));
    assert_eq!(storage.extension::<ItemLimitExtension>().unwrap().remaining_entry_count(), 0);
}

#[test]
fn test_item_limit_total_copies() {
    let mut storage = ItemStorage::new().with_extension(ItemLimitExtension::new(0, 10));

    let key = storage.add_item_stack(ItemStack::new(gold(), 6), AddStackBehavior::AddToAnyStack);
    assert!(!storage.add_item_stack(ItemStack::new(gold(), 5), AddStackBehavior::AddToAnyStack).is_valid());
    assert!(storage.add_item_stack(ItemStack::new(gold(), 4), AddStackBehavior::AddToAnyStack).is_valid());

    let limit = storage.extension::<ItemLimitExtension>().unwrap();
    assert_eq!(limit.total_item_count(), 10);
    assert_eq!(limit.remaining_total_item_count(), 0);

    storage.remove_entry(key, &tags::REMOVAL_DELETION, 7);
    let limit = storage.extension::<ItemLimitExtension>().unwrap();
    assert_eq!(limit.remaining_total_item_count(), 7);
}

#[test]
fn test_batch_addition_checks_each_stack() {
    let mut storage = ItemStorage::new().with_extension(ItemLimitExtension::new(1, 0));
    let gold = gold();

    let keys = storage.add_item_stacks(
        &[
            ItemStack::new(gold.clone(), 2),
            ItemStack::new(arrows(), 3),
            ItemStack::new(gold.clone(), 1),
        ],
        AddStackBehavior::AddToAnyStack,
    );

    assert!(keys[0].is_valid());
    assert_eq!(keys[1], EntryKey::INVALID);
    assert_eq!(keys[2], keys[0]);
    assert_eq!(storage.entry_amount(keys[0]), 3);
}

#[test]
fn test_possess_is_all_or_nothing() {
    let mut storage = ItemStorage::new().with_extension(ItemLimitExtension::new(0, 5));

    assert!(!storage.possess(ItemStack::new(arrows(), 8)));
    assert!(storage.is_empty());

    assert!(storage.possess(ItemStack::new(arrows(), 5)));
    assert_eq!(storage.stack_count(), 1);
}

#[test]
fn test_group_addition_check() {
    let storage = ItemStorage::new().with_extension(ItemLimitExtension::new(0, 10));
    let stacks = [ItemStack::new(gold(), 6), ItemStack::new(arrows(), 6)];

    let individual = AdditionArgs::new(AddStackBehavior::AddToAnyStack, AddStackTestType::IndividualTests);
    let group = AdditionArgs::new(AddStackBehavior::AddToAnyStack, AddStackTestType::GroupTest);

    assert!(storage.can_add_stacks(&stacks, individual));
    assert!(!storage.can_add_stacks(&stacks, group));
}

#[test]
fn test_logger_records_events() {
    let mut storage = ItemStorage::new().with_extension(LoggerExtension::new());
    let receiver = storage.extension_mut::<LoggerExtension>().unwrap().listen();

    let key = storage.add_item_stack(ItemStack::new(arrows(), 12), AddStackBehavior::AddToAnyStack);
    let address = storage.get_first_address().unwrap();
    storage.split_stack(address, 3);
    storage.remove_entry(key, &tags::REMOVAL_DELETION, ENTIRE_STACK);

    let logger = storage.extension::<LoggerExtension>().unwrap();
    let logged_tags: Vec<InventoryTag> = logger.events().iter().map(|logged| logged.event.tag.clone()).collect();
    assert_eq!(logged_tags, vec![tags::ADDITION, tags::EDIT_SPLIT, tags::REMOVAL_DELETION]);

    let timestamps: Vec<u64> = logger.events().iter().map(|logged| logged.event.timestamp).collect();
    assert!(timestamps.windows(2).all(|pair| pair[0] < pair[1]));

    let last = &logger.recent_events(1, 0)[0];
    assert_eq!(last.event.data.amount, 12);
    assert_eq!(last.event.data.addresses_touched.len(), 3);
    assert_eq!(last.container, storage.container_id());

    assert_eq!(receiver.try_iter().count(), 3);
}

#[test]
fn test_runtime_extensions() {
    let mut storage = ItemStorage::new();

    storage.add_extension(Box::new(LoggerExtension::new())).unwrap();
    assert!(storage.has_extension::<LoggerExtension>());

    let err = storage.add_extension(Box::new(LoggerExtension::new())).unwrap_err();
    assert!(matches!(err, StorageError::DuplicateExtension(_)));

    assert!(storage.remove_extension(LoggerExtension::extension_id()).is_ok());
    assert!(!storage.has_extension::<LoggerExtension>());
    assert!(matches!(
        storage.remove_extension(LoggerExtension::extension_id()),
        Err(StorageError::ExtensionNotFound(_))
    ));
}

#[test]
fn test_parent_group_policy() {
    let parent = ExtensionGroup::new()
        .with_extension(RemovalGuardExtension::new().deny_removal(tags::REMOVAL_DELETION))
        .into_shared();

    let mut a = ItemStorage::new();
    let mut b = ItemStorage::new();
    a.set_parent_group(Some(parent.clone()));
    b.set_parent_group(Some(parent.clone()));

    let key_a = a.add_item_stack(ItemStack::new(gold(), 3), AddStackBehavior::AddToAnyStack);
    let key_b = b.add_item_stack(ItemStack::new(gold(), 3), AddStackBehavior::AddToAnyStack);

    assert!(!a.remove_entry(key_a, &tags::REMOVAL_DELETION, 1));
    assert!(!b.remove_entry(key_b, &tags::REMOVAL_DELETION, 1));
    assert!(a.has_extension::<RemovalGuardExtension>());
    assert_eq!(parent.read().containers().len(), 2);

    a.set_parent_group(None);
    assert!(a.remove_entry(key_a, &tags::REMOVAL_DELETION, 1));
    assert_eq!(parent.read().containers(), &[b.container_id()]);
}

#[test]
fn test_parent_item_limit_is_shared() {
    let parent = ExtensionGroup::new()
        .with_extension(ItemLimitExtension::new(0, 10))
        .into_shared();

    let mut a = ItemStorage::new();
    let mut b = ItemStorage::new();
    a.set_parent_group(Some(parent.clone()));
    b.set_parent_group(Some(parent.clone()));

    assert!(a.possess(ItemStack::new(gold(), 6)));
    assert!(!b.possess(ItemStack::new(gold(), 5)));
    assert!(b.possess(ItemStack::new(gold(), 4)));

    drop(a);
    assert!(b.possess(ItemStack::new(gold(), 6)));
}

#[test]
fn test_mutate_item() {
    let mut storage = ItemStorage::new();
    let sword = storage.add_item_stack(ItemStack::single(Item::new("sword", "Sword").mutable().into_ref()), AddStackBehavior::AddToAnyStack);
    let coins = storage.add_item_stack(ItemStack::new(gold(), 5), AddStackBehavior::AddToAnyStack);
    let receiver = storage.change_channel();

    storage
        .try_mutate_item(sword, |item| item.name = "Sharp Sword".to_string())
        .unwrap();

    assert_eq!(storage.view_item(sword).unwrap().name, "Sharp Sword");
    let changes: Vec<StorageChange> = receiver.try_iter().collect();
    assert_eq!(changes, vec![StorageChange::new(ChangeKind::Updated, storage.get_first_address().unwrap())]);

    let err = storage.try_mutate_item(coins, |item| item.name = "Lead".to_string()).unwrap_err();
    assert_eq!(err, StorageError::ItemNotMutable("gold".to_string()));
    assert!(err.is_validation());
    assert!(!err.is_denied());
    assert_eq!(storage.view_item(coins).unwrap().name, "Gold Coin");
}

#[test]
fn test_on_item_mutated() {
    let mut storage = ItemStorage::new().with_extension(LoggerExtension::new());
    let gold = gold();
    storage.add_item_stack(ItemStack::new(gold.clone(), 2), AddStackBehavior::AddToAnyStack);

    assert!(storage.on_item_mutated(&gold));
    assert!(!storage.on_item_mutated(&self::gold()));

    let logger = storage.extension::<LoggerExtension>().unwrap();
    assert_eq!(logger.events().last().unwrap().event.tag, tags::EDIT_ITEM_MUTATED);
}

#[test]
fn test_find_item_modes() {
    let mut storage = ItemStorage::new();
    let held = gold();
    let key = storage.add_item_stack(ItemStack::new(held.clone(), 1), AddStackBehavior::AddToAnyStack);
    let lookalike = gold();

    assert_eq!(storage.find_item(&held, ItemEqualsCheck::ComparePointers), Some(key));
    assert_eq!(storage.find_item(&lookalike, ItemEqualsCheck::ComparePointers), None);
    assert!(storage.contains_item(&lookalike, ItemEqualsCheck::UseCompareWith));
    assert!(Arc::ptr_eq(&storage.get_entry_item(key).unwrap(), &held));
}

#[test]
fn test_release_through_container() {
    let mut storage = ItemStorage::new();
    let key = storage.add_item_stack(ItemStack::new(arrows(), 6), AddStackBehavior::AddToAnyStack);
    let address = storage.get_first_address().unwrap();

    let container: &mut dyn ItemContainer = &mut storage;
    let released = container.release(address, 2).unwrap();

    assert_eq!(released.copies, 2);
    assert_eq!(storage.entry_amount(key), 4);
    assert!(storage.release_entry(key, ENTIRE_STACK).is_some());
    assert!(storage.is_empty());
}

#[test]
fn test_views_and_iterators() {
    let mut storage = ItemStorage::new();
    let arrow_key = storage.add_item_stack(ItemStack::new(arrows(), 25), AddStackBehavior::AddToAnyStack);
    let gold_key = storage.add_item_stack(ItemStack::new(gold(), 4), AddStackBehavior::AddToAnyStack);

    let addresses = storage.get_all_addresses();
    assert_eq!(addresses.len(), 4);
    assert_eq!(storage.get_first_address(), Some(addresses[0]));
    assert_eq!(storage.iter_entry_addresses(gold_key).collect::<Vec<_>>(), vec![addresses[3]]);
    assert_eq!(storage.iter_entry_addresses(EntryKey::new(999)).count(), 0);

    assert_eq!(storage.view_entry(arrow_key).unwrap().copies, 25);
    assert_eq!(storage.view_stack(addresses[2]).unwrap().copies, 5);
    assert_eq!(ItemStorage::break_address(addresses[3]), (gold_key, addresses[3].stack()));

    assert_eq!(storage.iter_items().count(), 2);
    assert_eq!(storage.iter_mutable_items().count(), 0);
    assert_eq!(storage.get_all_keys(), vec![arrow_key, gold_key]);
}

#[test]
fn test_queries() {
    let mut storage = ItemStorage::new();
    let arrow_key = storage.add_item_stack(ItemStack::new(arrows(), 25), AddStackBehavior::AddToAnyStack);
    let gold_key = storage.add_item_stack(ItemStack::new(gold(), 4), AddStackBehavior::AddToAnyStack);
    let sword_key = storage.add_item_stack(
        ItemStack::single(Item::new("sword", "Sword").mutable().into_ref()),
        AddStackBehavior::AddToAnyStack,
    );

    let plenty = StorageFilter::new().by_min_amount(4);
    assert_eq!(storage.emit(&plenty), vec![arrow_key, gold_key]);
    assert_eq!(storage.count(&plenty.invert()), 1);
    assert_eq!(storage.first(&StorageFilter::new().mutable_only()), Some(sword_key));

    let query = StorageQuery::new().with_sort(StorageSort::ByAmount).inverted();
    assert_eq!(storage.query(&query), vec![arrow_key, gold_key, sword_key]);
}

#[test]
fn test_snapshot_json_roundtrip() {
    init_logging();
    let mut storage = ItemStorage::new().with_extension(ItemLimitExtension::new(0, 50));
    storage.add_item_stack(ItemStack::new(arrows(), 25), AddStackBehavior::AddToAnyStack);
    let gold_key = storage.add_item_stack(ItemStack::new(gold(), 4), AddStackBehavior::AddToAnyStack);
    storage.remove_entry(gold_key, &tags::REMOVAL_DELETION, ENTIRE_STACK);
    let last = storage.add_item_stack(ItemStack::new(gold(), 7), AddStackBehavior::AddToAnyStack);

    let json = storage.make_save_data().to_json().unwrap();
    let snapshot = StorageSnapshot::from_json(&json).unwrap();

    let mut restored = ItemStorage::new().with_extension(ItemLimitExtension::default());
    assert_eq!(restored.try_load_save_data(snapshot).unwrap(), 0);

    assert_eq!(restored.get_all_keys(), storage.get_all_keys());
    assert_eq!(restored.get_all_addresses(), storage.get_all_addresses());
    assert_eq!(restored.entry_amount(last), 7);

    let limit = restored.extension::<ItemLimitExtension>().unwrap();
    assert_eq!(limit.max_total_item_copies(), 50);
    assert_eq!(limit.total_item_count(), 32);

    let next = restored.add_item_stack(ItemStack::single(Item::new("gem", "Gem").into_ref()), AddStackBehavior::AddToAnyStack);
    assert!(next > last);

    // Stack keys continue too
    restored.add_item_stack(ItemStack::new(arrows(), 10), AddStackBehavior::OnlyNewStacks);
    let arrow_key = restored.find_item(&arrows(), ItemEqualsCheck::UseCompareWith).unwrap();
    let keys = restored.break_entry_into_keys(arrow_key);
    assert_eq!(keys.len(), 4);
    assert!(keys.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn test_snapshot_file_roundtrip() {
    let mut storage = ItemStorage::new();
    storage.add_item_stack(ItemStack::new(arrows(), 13), AddStackBehavior::AddToAnyStack);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("storage.bin");
    storage.make_save_data().save(&path).unwrap();

    let mut restored = ItemStorage::new();
    assert!(restored.load_save_data(StorageSnapshot::load(&path).unwrap()));
    assert_eq!(restored.get_all_addresses(), storage.get_all_addresses());
}

#[test]
fn test_load_drops_invalid_entries() {
    let mut storage = ItemStorage::new();
    storage.add_item_stack(ItemStack::new(gold(), 3), AddStackBehavior::AddToAnyStack);

    let mut snapshot = storage.make_save_data();
    snapshot.entries.push(Entry::new(EntryKey::new(900), arrows()));

    let mut restored = ItemStorage::new();
    restored.add_item_stack(ItemStack::new(arrows(), 1), AddStackBehavior::AddToAnyStack);

    assert_eq!(restored.try_load_save_data(snapshot).unwrap(), 1);
    assert_eq!(restored.entry_count(), 1);
    assert!(!restored.contains_item(&arrows(), ItemEqualsCheck::UseCompareWith));
}

#[test]
fn test_load_drops_duplicate_keys() {
    init_logging();
    let mut storage = ItemStorage::new();
    let key = storage.add_item_stack(ItemStack::new(gold(), 3), AddStackBehavior::AddToAnyStack);
    storage.add_item_stack(ItemStack::new(arrows(), 4), AddStackBehavior::AddToAnyStack);

    let mut snapshot = storage.make_save_data();
    let twin = snapshot.entries[0].clone();
    snapshot.entries.push(twin);

    let mut restored = ItemStorage::new();
    assert_eq!(restored.try_load_save_data(snapshot).unwrap(), 1);

    let keys = restored.get_all_keys();
    assert_eq!(keys, storage.get_all_keys());
    assert!(keys.windows(2).all(|pair| pair[0] < pair[1]));
    assert!(restored.remove_entry(key, &tags::REMOVAL_DELETION, ENTIRE_STACK));
    assert!(!restored.contains_key(key));
}

#[test]
fn test_corrupt_snapshot() {
    let err = StorageSnapshot::from_bytes(&[1, 2, 3]).unwrap_err();
    assert!(matches!(err, StorageError::Serialization(_)));
    assert!(StorageSnapshot::from_json("{").is_err());
}
