use warehouse::credentials::KEYVAULT_URL_ENV;
use warehouse::{CredentialConfig, Error, KeyVaultCredentials};

// Single test in this binary: it mutates the process environment.
#[test]
fn keyvault_without_url_fails_at_construction() {
    std::env::remove_var(KEYVAULT_URL_ENV);

    let err = KeyVaultCredentials::new(None).unwrap_err();
    assert!(matches!(err, Error::Configuration(_)), "{err:?}");
    assert!(err.to_string().contains(KEYVAULT_URL_ENV));

    let config = CredentialConfig::parse(r#"auth = "keyvault""#).unwrap();
    assert!(matches!(config.build(), Err(Error::Configuration(_))));

    std::env::set_var(KEYVAULT_URL_ENV, "https://from-env.vault.azure.net");
    let creds = KeyVaultCredentials::new(None).unwrap();
    assert_eq!(creds.vault_url(), "https://from-env.vault.azure.net");
    std::env::remove_var(KEYVAULT_URL_ENV);
}
