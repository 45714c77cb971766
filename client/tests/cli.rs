use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use shroud_client::{Address, Location, SecretStore};
use shroud_crypto::{commit, Salt};
use tempfile::tempdir;

const ACCOUNT: &str = "0x1111111111111111111111111111111111111111";
const CONTRACT: &str = "0x2222222222222222222222222222222222222222";

#[test]
fn commit_matches_library_digest() {
    let temp = tempdir().expect("tempdir");
    let expected = commit(4, 3, &Salt::from_u64(7)).expect("commit");
    cargo_bin_cmd!("shroud")
        .arg("--config")
        .arg(temp.path().join("absent.json"))
        .args(["commit", "--row", "4", "--col", "3", "--salt", "7"])
        .assert()
        .success()
        .stdout(format!("{expected}\n"));

    let negative = commit(-1, 2, &Salt::from_u64(9)).expect("commit");
    cargo_bin_cmd!("shroud")
        .arg("--config")
        .arg(temp.path().join("absent.json"))
        .args(["commit", "--row", "-1", "--col", "2", "--salt", "9"])
        .assert()
        .success()
        .stdout(predicate::str::contains(negative.to_string()));
}

#[test]
fn empty_store_lists_nothing() {
    let temp = tempdir().expect("tempdir");
    cargo_bin_cmd!("shroud")
        .arg("--config")
        .arg(temp.path().join("absent.json"))
        .arg("--store")
        .arg(temp.path().join("secrets"))
        .args(["--account", ACCOUNT, "--contract", CONTRACT, "secrets"])
        .assert()
        .success()
        .stdout(predicate::str::contains("no secrets stored"));
}

#[test]
fn secrets_lists_stored_openings() {
    let temp = tempdir().expect("tempdir");
    let store_path = temp.path().join("secrets");
    let salt = Salt::from_u64(7);
    let digest = commit(4, 3, &salt).expect("commit");
    {
        let store = SecretStore::open(&store_path).expect("open");
        let account: Address = ACCOUNT.parse().expect("account");
        let contract: Address = CONTRACT.parse().expect("contract");
        store
            .put(&digest, Location::new(4, 3), salt, &account, &contract)
            .expect("put");
    }

    cargo_bin_cmd!("shroud")
        .arg("--config")
        .arg(temp.path().join("absent.json"))
        .arg("--store")
        .arg(&store_path)
        .args(["--account", ACCOUNT, "--contract", CONTRACT, "secrets"])
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("{digest} [4,3] salt=7")));
}

#[test]
fn secrets_require_an_account() {
    let temp = tempdir().expect("tempdir");
    cargo_bin_cmd!("shroud")
        .env_remove("SHROUD_ACCOUNT")
        .arg("--config")
        .arg(temp.path().join("absent.json"))
        .arg("--store")
        .arg(temp.path().join("secrets"))
        .args(["--contract", CONTRACT, "secrets"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no account configured"));
}

#[test]
fn invalid_salt_is_rejected() {
    cargo_bin_cmd!("shroud")
        .args(["commit", "--row", "1", "--col", "1", "--salt", "not-a-number"])
        .assert()
        .failure();
}
