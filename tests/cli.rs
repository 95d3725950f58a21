use assert_cmd::Command;
use predicates::str::contains;

#[test]
fn unknown_verb_prints_usage_and_exits_2() {
    Command::cargo_bin("beacon")
        .unwrap()
        .arg("bogus")
        .assert()
        .code(2)
        .stderr(contains("Usage"));
}

#[test]
fn missing_verb_prints_usage_and_exits_2() {
    Command::cargo_bin("beacon")
        .unwrap()
        .assert()
        .code(2)
        .stderr(contains("Usage"));
}
