//! These need a NATS server with JetStream enabled listening on 127.0.0.1:4222. Run them with
//! `cargo test -- --ignored`.

use std::collections::BTreeMap;

use quill::{
    sessions::{KvSessionStore, SessionStore},
    storage::{CredStore, UserRepository},
    SecureString, UserInfo,
};

mod helpers;

fn user(hashed_password: &str, blogs: &[(&str, &str)]) -> UserInfo {
    let mut map: BTreeMap<String, _> = BTreeMap::new();
    for (blog, perm) in blogs {
        map.entry(blog.to_string())
            .or_insert_with(std::collections::BTreeSet::new)
            .insert(perm.to_string());
    }
    UserInfo {
        hashed_password: hashed_password.into(),
        must_change_password: false,
        email: Some("foo@example.org".to_string()),
        super_admin: false,
        blogs: map,
        recover: None,
    }
}

#[tokio::test]
#[ignore = "needs a running NATS server"]
async fn test_crud() {
    let store = CredStore::new(helpers::get_store("storage_crud").await)
        .await
        .expect("Should have been able to initialize a CredStore");

    assert!(
        store.get_user("foo").await.is_none(),
        "Users should not exist"
    );

    let foo_user = user("bar", &[("default", "usage")]);
    assert!(store
        .create_user("foo", foo_user.clone())
        .await
        .expect("Should have been able to insert a user"));
    assert!(
        !store.create_user("foo", user("other", &[])).await.unwrap(),
        "Creating an existing user should be refused"
    );

    let stored = store
        .get_user("foo")
        .await
        .expect("Should have been able to get a user");
    assert_eq!(
        stored.hashed_password, foo_user.hashed_password,
        "Users should be equal"
    );
    assert_eq!(stored.blogs, foo_user.blogs, "Users should be equal");

    store
        .update_user("foo", |info| {
            info.must_change_password = true;
            Ok(())
        })
        .await
        .expect("Should be able to update user")
        .expect("User should exist");
    let stored = store
        .get_user("foo")
        .await
        .expect("Should have been able to get a user");
    assert!(
        stored.must_change_password,
        "Users should be equal after update"
    );

    store
        .delete_user("foo")
        .await
        .expect("Should have been able to delete a user");
    assert!(
        store.get_user("foo").await.is_none(),
        "Users should not exist"
    );
    assert!(store
        .update_user("foo", |_| Ok(()))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
#[ignore = "needs a running NATS server"]
async fn test_initialization() {
    let bucket = helpers::get_store("storage_init").await;
    let store = CredStore::new(bucket.clone())
        .await
        .expect("Should have been able to initialize a CredStore");

    for (user_id, info) in [
        ("foo", user("bar", &[("default", "usage")])),
        ("jean dupont@example.org", user("baz", &[("other", "admin")])),
    ] {
        store
            .create_user(user_id, info)
            .await
            .expect("Should be able to insert a user");
    }

    // Then drop the store and re-initialize it
    drop(store);

    let store = CredStore::new(bucket)
        .await
        .expect("Should have been able to initialize a CredStore");
    let users = store.list_users().await.unwrap();
    assert_eq!(
        users,
        vec!["foo".to_string(), "jean dupont@example.org".to_string()]
    );
    let stored = store
        .get_user("jean dupont@example.org")
        .await
        .expect("Should have been able to get a user after initialization");
    assert_eq!(stored.hashed_password, SecureString::from("baz"));
    assert!(stored.blogs.contains_key("other"));
}

#[tokio::test]
#[ignore = "needs a running NATS server"]
async fn test_sync() {
    let bucket = helpers::get_store("storage_sync").await;
    let main_store = CredStore::new(bucket.clone())
        .await
        .expect("Should have been able to initialize a CredStore");
    let reflected_store = CredStore::new(bucket)
        .await
        .expect("Should have been able to initialize a CredStore");

    // Insert some data in the main store, sleep, then see that it was reflected in the reflected store
    main_store
        .create_user("foo", user("bar", &[("default", "usage")]))
        .await
        .unwrap();
    tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
    assert!(
        reflected_store.get_user("foo").await.is_some(),
        "User should exist in reflected store"
    );

    main_store.delete_user("foo").await.unwrap();
    tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
    assert!(
        reflected_store.get_user("foo").await.is_none(),
        "User should not exist in reflected store"
    );
}

async fn grant(store: &CredStore, blog: &str) -> quill::error::Result<Option<()>> {
    store
        .update_user("foo", |info| {
            info.blogs
                .entry(blog.to_string())
                .or_default()
                .insert("usage".to_string());
            Ok(())
        })
        .await
}

#[tokio::test]
#[ignore = "needs a running NATS server"]
async fn test_concurrent_updates_from_two_stores() {
    let bucket = helpers::get_store("storage_concurrent").await;
    let first = CredStore::new(bucket.clone())
        .await
        .expect("Should have been able to initialize a CredStore");
    let second = CredStore::new(bucket)
        .await
        .expect("Should have been able to initialize a CredStore");
    first.create_user("foo", user("bar", &[])).await.unwrap();

    let (a, b, c, d) = tokio::join!(
        grant(&first, "one"),
        grant(&second, "two"),
        grant(&first, "three"),
        grant(&second, "four"),
    );
    for res in [a, b, c, d] {
        res.expect("Update should succeed").expect("User should exist");
    }

    tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
    for store in [&first, &second] {
        let stored = store.get_user("foo").await.expect("User should exist");
        assert_eq!(
            stored.blogs.len(),
            4,
            "No update should have overwritten another"
        );
    }
}

#[tokio::test]
#[ignore = "needs a running NATS server"]
async fn test_kv_sessions() {
    let sessions = KvSessionStore::new(helpers::get_store("sessions").await);
    let session = sessions
        .start("alice", "fingerprint")
        .await
        .expect("Should be able to start a session");
    sessions.bind_blog(&session, "default").await.unwrap();
    sessions.set_safe_mode(&session).await.unwrap();

    let record = sessions
        .get(&session)
        .await
        .unwrap()
        .expect("Session should exist");
    assert_eq!(record.user_id, "alice");
    assert_eq!(record.blog_id.as_deref(), Some("default"));
    assert!(record.safe_mode);

    sessions.destroy(&session).await.unwrap();
    assert!(sessions.get(&session).await.unwrap().is_none());
}
