// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for reconciler helper functions.

#[cfg(test)]
mod tests {
    use super::super::credentials_for;
    use crate::connection_cache::Credentials;
    use crate::store::memory::MemoryCredentialSource;

    #[tokio::test]
    async fn test_unnamed_secret_gives_empty_credentials() {
        let source = MemoryCredentialSource::new();
        let creds = credentials_for(&source, "", "topohub").await.unwrap();
        assert_eq!(creds, Credentials::new("", ""));
    }

    #[tokio::test]
    async fn test_named_secret_is_looked_up() {
        let source = MemoryCredentialSource::new();
        source
            .insert("bmc-credentials", "topohub", Credentials::new("admin", "secret"))
            .await;

        let creds = credentials_for(&source, "bmc-credentials", "topohub")
            .await
            .unwrap();
        assert_eq!(creds.username, "admin");

        let err = credentials_for(&source, "bmc-credentials", "other")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
