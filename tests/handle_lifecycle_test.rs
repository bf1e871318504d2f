use heed_handles::{
    Encoding, Environment, EnvironmentConfig, HandleError, HandleState, MemoryGateway,
    MemoryTransaction, NativeId, OpenFlags, status,
};

// Helper function to create an environment whose opens create missing databases
fn setup_env() -> Environment<MemoryGateway> {
    Environment::new(
        MemoryGateway::new(),
        EnvironmentConfig::default().default_flags(OpenFlags::CREATE),
    )
}

#[test]
fn test_reopen_shares_native_handle() -> Result<(), HandleError> {
    let env = setup_env();
    let mut txn = MemoryTransaction::write();

    let first = env.open_database(&mut txn, Some("orders"), None, None)?;
    let second = env.open_database(&mut txn, Some("orders"), None, None)?;

    assert!(first.shares_native_with(&second));
    assert_eq!(env.gateway().open_calls(), 1);
    assert_eq!(env.reference_count(Some("orders")), 2);
    assert_eq!(env.stats().shared_opens, 1);
    Ok(())
}

#[test]
fn test_last_close_releases_native_handle() -> Result<(), HandleError> {
    let env = setup_env();
    let mut txn = MemoryTransaction::write();

    let a = env.open_database(&mut txn, Some("orders"), None, None)?;
    let b = env.open_database(&mut txn, Some("orders"), None, None)?;
    let c = env.open_database(&mut txn, Some("orders"), None, None)?;

    a.close()?;
    b.close()?;
    assert_eq!(env.gateway().close_calls(), 0);
    assert!(env.is_open(Some("orders")));
    assert_eq!(env.reference_count(Some("orders")), 1);

    c.close()?;
    assert_eq!(env.gateway().close_calls(), 1);
    assert!(!env.is_open(Some("orders")));
    assert!(env.open_names().is_empty());
    Ok(())
}

#[test]
fn test_close_twice_decrements_once() -> Result<(), HandleError> {
    let env = setup_env();
    let mut txn = MemoryTransaction::write();

    let a = env.open_database(&mut txn, Some("orders"), None, None)?;
    let b = env.open_database(&mut txn, Some("orders"), None, None)?;

    a.close()?;
    a.close()?;
    assert_eq!(env.reference_count(Some("orders")), 1);
    assert_eq!(a.state(), HandleState::Closed);
    assert!(a.is_released());
    assert_eq!(b.state(), HandleState::Opened);
    assert_eq!(env.gateway().close_calls(), 0);

    // dispose after an explicit close is a no-op too
    a.dispose()?;
    assert_eq!(env.reference_count(Some("orders")), 1);
    b.dispose()?;
    assert_eq!(env.gateway().close_calls(), 1);
    Ok(())
}

#[test]
fn test_drop_closes_handle() -> Result<(), HandleError> {
    let env = setup_env();
    let mut txn = MemoryTransaction::write();

    {
        let _orders = env.open_database(&mut txn, Some("orders"), None, None)?;
        assert!(env.is_open(Some("orders")));
    }

    assert!(!env.is_open(Some("orders")));
    assert_eq!(env.gateway().close_calls(), 1);
    assert_eq!(env.gateway().open_handles(), 0);
    Ok(())
}

#[test]
fn test_incompatible_flags_rejected_while_live() -> Result<(), HandleError> {
    let env = setup_env();
    let mut txn = MemoryTransaction::write();

    let sorted = env.open_database(
        &mut txn,
        Some("orders"),
        Some(OpenFlags::CREATE | OpenFlags::DUP_SORT),
        None,
    )?;

    let result = env.open_database(&mut txn, Some("orders"), Some(OpenFlags::INTEGER_KEY), None);
    assert!(matches!(result, Err(HandleError::ProtocolViolation(_))));
    assert_eq!(env.reference_count(Some("orders")), 1);
    assert_eq!(env.open_flags(Some("orders")), Some(OpenFlags::CREATE | OpenFlags::DUP_SORT));

    // same layout without CREATE is fine, and reports the first opener's flags
    let again = env.open_database(&mut txn, Some("orders"), Some(OpenFlags::DUP_SORT), None)?;
    assert_eq!(again.open_flags(), OpenFlags::CREATE | OpenFlags::DUP_SORT);

    sorted.close()?;
    again.close()?;

    // once closed, the name can be opened with other flags
    let plain = env.open_database(&mut txn, Some("orders"), Some(OpenFlags::empty()), None)?;
    assert_eq!(plain.open_flags(), OpenFlags::empty());
    assert_eq!(env.gateway().open_calls(), 2);
    Ok(())
}

#[test]
fn test_failed_open_leaves_no_entry() -> Result<(), HandleError> {
    let env = setup_env();
    let mut txn = MemoryTransaction::write();

    env.gateway().fail_next_open(status::DBS_FULL);
    let err = env
        .open_database(&mut txn, Some("orders"), None, None)
        .unwrap_err();
    assert_eq!(err.engine_code(), Some(status::DBS_FULL));
    assert!(!env.is_open(Some("orders")));
    assert_eq!(env.live_instances(Some("orders")), 0);
    assert_eq!(env.stats().native_opens, 0);

    // a retry behaves like a first open
    let orders = env.open_database(&mut txn, Some("orders"), None, None)?;
    assert!(orders.is_opened());
    assert_eq!(env.gateway().open_calls(), 2);
    assert_eq!(env.reference_count(Some("orders")), 1);
    Ok(())
}

#[test]
fn test_failed_close_can_be_retried() -> Result<(), HandleError> {
    let env = setup_env();
    let mut txn = MemoryTransaction::write();
    let orders = env.open_database(&mut txn, Some("orders"), None, None)?;

    env.gateway().fail_next_close(status::EIO);
    let err = orders.close().unwrap_err();
    assert_eq!(err.engine_code(), Some(status::EIO));
    assert!(orders.is_opened());
    assert!(!orders.is_released());
    assert_eq!(env.reference_count(Some("orders")), 1);

    orders.close()?;
    assert!(!env.is_open(Some("orders")));
    assert_eq!(env.gateway().close_calls(), 2);
    assert_eq!(env.gateway().closed_ids(), vec![NativeId(1)]);
    Ok(())
}

#[test]
fn test_inactive_transaction_is_invalid_argument() {
    let env = setup_env();
    let mut txn = MemoryTransaction::write();
    txn.commit();

    let result = env.open_database(&mut txn, Some("orders"), None, None);
    assert!(matches!(result, Err(HandleError::InvalidArgument(_))));
    assert_eq!(env.gateway().open_calls(), 0);

    let mut aborted = MemoryTransaction::read();
    aborted.abort();
    assert!(matches!(
        env.database_options().open(&mut aborted),
        Err(HandleError::InvalidArgument(_))
    ));
}

#[test]
fn test_empty_name_is_invalid_argument() {
    let env = setup_env();
    let mut txn = MemoryTransaction::write();
    let result = env.open_database(&mut txn, Some(""), None, None);
    assert!(matches!(result, Err(HandleError::InvalidArgument(_))));
}

#[test]
fn test_engine_errors_propagate_verbatim() {
    let env = Environment::new(MemoryGateway::new(), EnvironmentConfig::default());

    // default flags lack CREATE, so a missing database is reported by the engine
    let mut txn = MemoryTransaction::write();
    let err = env
        .open_database(&mut txn, Some("missing"), None, None)
        .unwrap_err();
    assert_eq!(err.engine_code(), Some(status::NOT_FOUND));

    let mut rtxn = MemoryTransaction::read();
    let err = env
        .open_database(&mut rtxn, Some("missing"), Some(OpenFlags::CREATE), None)
        .unwrap_err();
    assert_eq!(err.engine_code(), Some(status::EACCES));
    assert!(env.open_names().is_empty());
}

#[test]
fn test_defaults_come_from_environment() -> Result<(), HandleError> {
    let config = EnvironmentConfig::new()
        .default_name("data")
        .default_encoding(Encoding::Utf16Le);
    let env = Environment::new(MemoryGateway::new(), config);
    let mut txn = MemoryTransaction::read();

    let main = env.database_options().open(&mut txn)?;
    assert_eq!(main.name(), "data");
    assert!(main.is_main());
    assert_eq!(main.encoding(), Encoding::Utf16Le);
    assert_eq!(main.open_flags(), OpenFlags::empty());
    assert_eq!(main.encode("A")?, vec![0x41, 0x00]);
    assert_eq!(env.open_names(), vec![None]);
    Ok(())
}

#[test]
fn test_main_database_default_name() -> Result<(), HandleError> {
    let env = setup_env();
    let mut txn = MemoryTransaction::write();

    let main = env.open_database(&mut txn, None, None, None)?;
    let named = env.open_database(&mut txn, Some("master"), None, None)?;
    assert_eq!(main.name(), "master");
    assert_eq!(named.name(), "master");
    // the unnamed main database and a database called "master" are different
    assert!(!main.shares_native_with(&named));
    assert_eq!(env.open_names(), vec![None, Some("master".to_string())]);
    Ok(())
}

#[test]
fn test_encoding_is_per_instance() -> Result<(), HandleError> {
    let env = setup_env();
    let mut txn = MemoryTransaction::write();

    let utf8 = env.database_options().name("names").open(&mut txn)?;
    let latin1 = env
        .database_options()
        .name("names")
        .encoding(Encoding::Latin1)
        .open(&mut txn)?;

    assert!(utf8.shares_native_with(&latin1));
    assert_eq!(utf8.encode("é")?, vec![0xC3, 0xA9]);
    assert_eq!(latin1.encode("é")?, vec![0xE9]);
    assert_eq!(latin1.decode(&[0xE9])?, "é");
    Ok(())
}

#[test]
fn test_closed_instance_slot_is_recycled() -> Result<(), HandleError> {
    let env = setup_env();
    let mut txn = MemoryTransaction::write();

    let first = env.open_database(&mut txn, Some("orders"), None, None)?;
    let slot = first.instance_slot();
    assert_eq!(env.live_instances(Some("orders")), 1);
    first.close()?;
    assert_eq!(env.live_instances(Some("orders")), 0);

    let other = env.open_database(&mut txn, Some("accounts"), None, None)?;
    assert_ne!(other.instance_slot(), slot);

    let second = env.open_database(&mut txn, Some("orders"), None, None)?;
    assert_eq!(second.instance_slot(), slot);
    assert_eq!(env.stats().recycled_instances, 1);
    // the recycled slot does not resurrect the closed instance
    assert_eq!(first.state(), HandleState::Closed);
    Ok(())
}

#[test]
fn test_pool_disabled() -> Result<(), HandleError> {
    let env = Environment::new(
        MemoryGateway::new(),
        EnvironmentConfig::default()
            .default_flags(OpenFlags::CREATE)
            .pool_capacity(0),
    );
    let mut txn = MemoryTransaction::write();

    let first = env.open_database(&mut txn, Some("orders"), None, None)?;
    let slot = first.instance_slot();
    first.dispose()?;

    let second = env.open_database(&mut txn, Some("orders"), None, None)?;
    assert_ne!(second.instance_slot(), slot);
    assert_eq!(env.stats().recycled_instances, 0);
    Ok(())
}

#[test]
fn test_handle_outliving_environment() -> Result<(), HandleError> {
    let env = setup_env();
    let mut txn = MemoryTransaction::write();
    let orders = env.open_database(&mut txn, Some("orders"), None, None)?;
    assert!(orders.environment().is_some());

    drop(env);

    assert!(orders.environment().is_none());
    orders.close()?;
    assert_eq!(orders.state(), HandleState::Closed);
    Ok(())
}

#[test]
fn test_independent_environments() -> Result<(), HandleError> {
    let left = setup_env();
    let right = setup_env();
    let mut left_txn = MemoryTransaction::write();
    let mut right_txn = MemoryTransaction::write();

    let a = left.open_database(&mut left_txn, Some("orders"), None, None)?;
    let b = right.open_database(&mut right_txn, Some("orders"), None, None)?;

    // same id in two tables is still two native handles
    assert!(!a.shares_native_with(&b));
    a.close()?;
    assert_eq!(left.gateway().close_calls(), 1);
    assert_eq!(right.reference_count(Some("orders")), 1);
    Ok(())
}

#[test]
fn test_teardown_closes_each_remaining_id_once() -> Result<(), HandleError> {
    let gateway = MemoryGateway::new();
    let env = Environment::new(
        gateway.clone(),
        EnvironmentConfig::default().default_flags(OpenFlags::CREATE),
    );
    let mut txn = MemoryTransaction::write();

    let a = env.open_database(&mut txn, Some("a"), None, None)?;
    let b = env.open_database(&mut txn, Some("a"), None, None)?;
    let c = env.open_database(&mut txn, Some("c"), None, None)?;
    c.close()?;
    assert_eq!(gateway.close_calls(), 1);

    drop(env);

    // "a" still had two instances, teardown closes its id once
    assert_eq!(gateway.close_calls(), 2);
    assert_eq!(gateway.closed_ids(), vec![NativeId(2), NativeId(1)]);
    assert_eq!(gateway.open_handles(), 0);

    // surviving instances only flip to closed
    a.close()?;
    drop(b);
    assert_eq!(gateway.close_calls(), 2);
    assert_eq!(a.state(), HandleState::Closed);
    Ok(())
}
