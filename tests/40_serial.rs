mod common;

use anyhow::Result;

#[tokio::test]
async fn first_serial_is_one() -> Result<()> {
    let stack = common::stack();
    assert_eq!(stack.serials.next_serial().await.as_deref(), Some("1"));
    Ok(())
}

#[tokio::test]
async fn prefixed_historical_values_count_toward_max() -> Result<()> {
    let stack = common::stack();
    for serial in ["1", "2", "PA-9"] {
        stack.store.insert_serial(serial).await;
    }
    assert_eq!(stack.serials.next_serial().await.as_deref(), Some("10"));
    Ok(())
}

#[tokio::test]
async fn unparsable_values_are_ignored() -> Result<()> {
    let stack = common::stack();
    for serial in ["draft", "", "0", "3"] {
        stack.store.insert_serial(serial).await;
    }
    assert_eq!(stack.serials.next_serial().await.as_deref(), Some("4"));
    Ok(())
}

#[tokio::test]
async fn unavailable_store_degrades_to_no_serial() -> Result<()> {
    let stack = common::stack();
    stack.store.insert_serial("5").await;
    stack.store.set_serials_unavailable(true);
    assert_eq!(stack.serials.next_serial().await, None);

    // Recovery resumes allocation where the data left off
    stack.store.set_serials_unavailable(false);
    assert_eq!(stack.serials.next_serial().await.as_deref(), Some("6"));
    Ok(())
}
