use chrono::{Duration, Utc};
use uuid::Uuid;

use sessionkeeper_backend::{
    models::{ClientMeta, NewAccount, NewSessionRecord},
    repositories::{AccountRepository, PgAccountRepository, PgSessionStore, SessionStore, StoreError},
    types::AccountId,
};

mod support;

macro_rules! require_pool {
    () => {
        match support::test_pool().await {
            Some(pool) => pool,
            None => {
                eprintln!("TEST_DATABASE_URL not set; skipping");
                return;
            }
        }
    };
}

async fn seed_account(accounts: &PgAccountRepository) -> AccountId {
    let account = accounts
        .create(NewAccount {
            id: AccountId::new(),
            email: format!("pg-{}@example.com", Uuid::new_v4()),
            password_hash: "$argon2id$v=19$m=8,t=1,p=1$c2FsdHNhbHQ$aGFzaA".into(),
            created_at: Utc::now(),
        })
        .await
        .expect("create account");
    account.id
}

fn new_record(account_id: AccountId, ttl: Duration) -> NewSessionRecord {
    NewSessionRecord {
        account_id,
        token_hash: format!("hash-{}", Uuid::new_v4()),
        expires_at: Utc::now() + ttl,
        meta: ClientMeta {
            user_agent: Some("pg-test".into()),
            ip_address: Some("192.0.2.10".into()),
        },
    }
}

#[tokio::test]
async fn pg_account_email_is_unique_ignoring_case() {
    let pool = require_pool!();
    let accounts = PgAccountRepository::new(pool);
    let email = format!("Case-{}@Example.com", Uuid::new_v4());

    let created = accounts
        .create(NewAccount {
            id: AccountId::new(),
            email: email.to_lowercase(),
            password_hash: "digest".into(),
            created_at: Utc::now(),
        })
        .await
        .unwrap();

    let duplicate = accounts
        .create(NewAccount {
            id: AccountId::new(),
            email: email.to_uppercase(),
            password_hash: "digest".into(),
            created_at: Utc::now(),
        })
        .await;
    assert!(matches!(duplicate, Err(StoreError::Conflict)));

    let found = accounts.find_by_email(&email).await.unwrap().unwrap();
    assert_eq!(found.id, created.id);

    let at = Utc::now();
    accounts.record_login(created.id, at).await.unwrap();
    assert!(accounts.update_password(created.id, "new-digest", at).await.unwrap());
    let reloaded = accounts.find_by_id(created.id).await.unwrap().unwrap();
    assert_eq!(reloaded.password_hash, "new-digest");
    assert!(reloaded.last_login_at.is_some());
    accounts.ping().await.unwrap();
}

#[tokio::test]
async fn pg_find_only_returns_live_records() {
    let pool = require_pool!();
    let accounts = PgAccountRepository::new(pool.clone());
    let sessions = PgSessionStore::new(pool);
    let account_id = seed_account(&accounts).await;

    let live = sessions
        .create(new_record(account_id, Duration::hours(1)))
        .await
        .unwrap();
    let expired = sessions
        .create(new_record(account_id, Duration::seconds(-1)))
        .await
        .unwrap();

    let found = sessions.find(&live.token_hash).await.unwrap().unwrap();
    assert_eq!(found.id, live.id);
    assert_eq!(found.ip_address.as_deref(), Some("192.0.2.10"));
    assert!(sessions.find(&expired.token_hash).await.unwrap().is_none());

    sessions.touch(live.id).await.unwrap();
    assert!(sessions
        .find(&live.token_hash)
        .await
        .unwrap()
        .unwrap()
        .last_used_at
        .is_some());

    assert!(sessions.revoke(&live.token_hash).await.unwrap());
    assert!(sessions.find(&live.token_hash).await.unwrap().is_none());
    assert!(sessions.find_revoked(&live.token_hash).await.unwrap().is_some());
}

#[tokio::test]
async fn pg_rotation_is_single_use() {
    let pool = require_pool!();
    let accounts = PgAccountRepository::new(pool.clone());
    let sessions = PgSessionStore::new(pool);
    let account_id = seed_account(&accounts).await;

    let original = sessions
        .create(new_record(account_id, Duration::days(7)))
        .await
        .unwrap();

    let first = new_record(account_id, Duration::days(7));
    let second = new_record(account_id, Duration::days(7));
    let (a, b) = tokio::join!(
        sessions.rotate(&original.token_hash, first),
        sessions.rotate(&original.token_hash, second),
    );
    let successes = [a.unwrap(), b.unwrap()]
        .into_iter()
        .filter(Option::is_some)
        .count();
    assert_eq!(successes, 1);
    assert!(sessions.find(&original.token_hash).await.unwrap().is_none());

    let late = sessions
        .rotate(&original.token_hash, new_record(account_id, Duration::days(7)))
        .await
        .unwrap();
    assert!(late.is_none());
}

#[tokio::test]
async fn pg_revoke_all_and_purge() {
    let pool = require_pool!();
    let accounts = PgAccountRepository::new(pool.clone());
    let sessions = PgSessionStore::new(pool);
    let account_id = seed_account(&accounts).await;

    let mut hashes = Vec::new();
    for _ in 0..3 {
        let record = sessions
            .create(new_record(account_id, Duration::days(1)))
            .await
            .unwrap();
        hashes.push(record.token_hash);
    }

    assert_eq!(sessions.revoke_all(account_id).await.unwrap(), 3);
    for hash in &hashes {
        assert!(sessions.find(hash).await.unwrap().is_none());
    }

    assert!(sessions.purge_expired_or_revoked().await.unwrap() >= 3);
    for hash in &hashes {
        assert!(sessions.find_revoked(hash).await.unwrap().is_none());
    }
}
