//! # IAM Policy Documents
//!
//! Builds the trust document attached to the grantee role and the permission
//! document granting read on one Secrets Manager secret.
//!
//! Trust statements are bounded by the number of distinct principals, not by
//! the number of subjects: all in-cluster service accounts share one
//! federated statement, and foreign identities share one statement per
//! account.

use crate::crd::Subject;
use crate::provider::ProviderError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

pub const POLICY_VERSION: &str = "2012-10-17";

/// Audience EKS pod identity tokens are issued for
const STS_AUDIENCE: &str = "sts.amazonaws.com";

/// IAM role and policy names are limited to 64 characters
const MAX_IAM_NAME_LEN: usize = 64;
const NAME_HASH_LEN: usize = 12;

/// Length of the random suffix Secrets Manager appends to secret ARNs
const SECRET_ARN_SUFFIX_LEN: usize = 6;

/// Condition block: operator → key → accepted values
pub type Conditions = BTreeMap<String, BTreeMap<String, Vec<String>>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    pub version: String,
    pub statement: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    pub effect: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<BTreeMap<String, String>>,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub condition: Conditions,
}

impl PolicyDocument {
    fn new(statement: Vec<Statement>) -> Self {
        Self {
            version: POLICY_VERSION.to_string(),
            statement,
        }
    }

    /// Serialize for the IAM API
    ///
    /// # Errors
    ///
    /// Serialization of these types does not fail in practice; the error is
    /// mapped for completeness.
    pub fn to_json(&self) -> Result<String, ProviderError> {
        serde_json::to_string(self)
            .map_err(|e| ProviderError::InvalidRequest(format!("policy document: {e}")))
    }
}

/// The cluster's IAM OIDC identity provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OidcProvider {
    pub arn: String,
    /// Issuer host and path, the prefix of token claim keys
    pub issuer: String,
}

impl OidcProvider {
    /// Parse from an `arn:aws:iam::<account>:oidc-provider/<issuer>` ARN
    ///
    /// # Errors
    ///
    /// `Config` when the ARN has no issuer part.
    pub fn from_arn(arn: &str) -> Result<Self, ProviderError> {
        let issuer = arn
            .split_once('/')
            .map(|(_, issuer)| issuer)
            .filter(|issuer| !issuer.is_empty())
            .ok_or_else(|| ProviderError::Config(format!("invalid OIDC provider ARN '{arn}'")))?;

        Ok(Self {
            arn: arn.to_string(),
            issuer: issuer.to_string(),
        })
    }
}

/// Foreign principal ARN split into the parts the trust document needs
#[derive(Debug, Clone, PartialEq, Eq)]
struct ForeignPrincipal<'a> {
    partition: &'a str,
    account: &'a str,
}

fn parse_foreign_principal(identifier: &str) -> Result<ForeignPrincipal<'_>, ProviderError> {
    let parts: Vec<&str> = identifier.splitn(6, ':').collect();
    let valid = parts.len() == 6 && parts[0] == "arn" && !parts[1].is_empty();
    if !valid {
        return Err(ProviderError::InvalidRequest(format!(
            "'{identifier}' is not an ARN"
        )));
    }

    let account = parts[4];
    if account.len() != 12 || !account.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ProviderError::InvalidRequest(format!(
            "'{identifier}' does not carry a 12-digit account id"
        )));
    }

    Ok(ForeignPrincipal {
        partition: parts[1],
        account,
    })
}

/// Subject claim EKS puts in a service account token
#[must_use]
pub fn service_account_subject(namespace: &str, name: &str) -> String {
    format!("system:serviceaccount:{namespace}:{name}")
}

/// Compose the trust document for a set of subjects
///
/// Statement order: the federated statement first (when any service account
/// is present), then one statement per foreign account in first-seen order.
/// Duplicate subjects collapse.
///
/// # Errors
///
/// `InvalidRequest` for a malformed foreign identifier or when service
/// accounts are granted but no OIDC provider is configured.
pub fn trust_document(
    subjects: &[Subject<'_>],
    oidc: Option<&OidcProvider>,
) -> Result<PolicyDocument, ProviderError> {
    let mut service_accounts: Vec<String> = Vec::new();
    let mut accounts: Vec<(String, String, Vec<String>)> = Vec::new();

    for subject in subjects {
        match subject {
            Subject::ServiceAccount(sa) => {
                let claim = service_account_subject(&sa.namespace, &sa.name);
                if !service_accounts.contains(&claim) {
                    service_accounts.push(claim);
                }
            }
            Subject::External(ext) => {
                let principal = parse_foreign_principal(&ext.identifier)?;
                let entry = match accounts
                    .iter()
                    .position(|(account, _, _)| account == principal.account)
                {
                    Some(i) => &mut accounts[i],
                    None => {
                        accounts.push((
                            principal.account.to_string(),
                            principal.partition.to_string(),
                            Vec::new(),
                        ));
                        let last = accounts.len() - 1;
                        &mut accounts[last]
                    }
                };
                if !entry.2.contains(&ext.identifier) {
                    entry.2.push(ext.identifier.clone());
                }
            }
        }
    }

    let mut statements = Vec::with_capacity(accounts.len() + 1);

    if !service_accounts.is_empty() {
        let oidc = oidc.ok_or_else(|| {
            ProviderError::InvalidRequest(
                "service account subjects require an OIDC provider in the provider config"
                    .to_string(),
            )
        })?;
        let claims = BTreeMap::from([
            (format!("{}:sub", oidc.issuer), service_accounts),
            (format!("{}:aud", oidc.issuer), vec![STS_AUDIENCE.to_string()]),
        ]);
        statements.push(Statement {
            effect: "Allow".to_string(),
            principal: Some(BTreeMap::from([(
                "Federated".to_string(),
                oidc.arn.clone(),
            )])),
            action: "sts:AssumeRoleWithWebIdentity".to_string(),
            resource: None,
            condition: BTreeMap::from([("StringEquals".to_string(), claims)]),
        });
    }

    for (account, partition, identifiers) in accounts {
        statements.push(Statement {
            effect: "Allow".to_string(),
            principal: Some(BTreeMap::from([(
                "AWS".to_string(),
                format!("arn:{partition}:iam::{account}:root"),
            )])),
            action: "sts:AssumeRole".to_string(),
            resource: None,
            condition: BTreeMap::from([(
                "ArnEquals".to_string(),
                BTreeMap::from([("aws:PrincipalArn".to_string(), identifiers)]),
            )]),
        });
    }

    Ok(PolicyDocument::new(statements))
}

/// Resource pattern matching exactly one secret
///
/// Secrets Manager appends `-` and six random characters to every secret
/// ARN; only those six are wildcarded.
#[must_use]
pub fn secret_resource_pattern(secret_arn: &str) -> String {
    match secret_arn.rsplit_once('-') {
        Some((head, suffix))
            if suffix.len() == SECRET_ARN_SUFFIX_LEN
                && suffix.bytes().all(|b| b.is_ascii_alphanumeric()) =>
        {
            format!("{head}-{}", "?".repeat(SECRET_ARN_SUFFIX_LEN))
        }
        _ => secret_arn.to_string(),
    }
}

/// Permission document granting read on one secret
#[must_use]
pub fn read_document(secret_arn: &str) -> PolicyDocument {
    PolicyDocument::new(vec![Statement {
        effect: "Allow".to_string(),
        principal: None,
        action: "secretsmanager:GetSecretValue".to_string(),
        resource: Some(secret_resource_pattern(secret_arn)),
        condition: BTreeMap::new(),
    }])
}

/// Name shared by the grantee role and its permission policy
///
/// Names over the IAM limit are truncated and suffixed with a stable hash of
/// the full name so distinct grants never collide.
#[must_use]
pub fn grant_name(prefix: &str, namespace: &str, name: &str) -> String {
    let full = format!("{prefix}-{namespace}-{name}");
    if full.len() <= MAX_IAM_NAME_LEN {
        return full;
    }

    let digest = Sha256::digest(full.as_bytes());
    let hash: String = digest
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<String>()
        .chars()
        .take(NAME_HASH_LEN)
        .collect();
    let keep = MAX_IAM_NAME_LEN - NAME_HASH_LEN - 1;
    let head: String = full.chars().take(keep).collect();
    format!("{}-{hash}", head.trim_end_matches('-'))
}

/// ARN of a customer managed policy in the same account as a secret
///
/// # Errors
///
/// `InvalidRequest` when the secret ARN cannot be parsed.
pub fn policy_arn_for(secret_arn: &str, policy_name: &str) -> Result<String, ProviderError> {
    let parts: Vec<&str> = secret_arn.splitn(6, ':').collect();
    match parts.as_slice() {
        ["arn", partition, _, _, account, _] if !account.is_empty() => {
            Ok(format!("arn:{partition}:iam::{account}:policy/{policy_name}"))
        }
        _ => Err(ProviderError::InvalidRequest(format!(
            "'{secret_arn}' is not a secret ARN"
        ))),
    }
}
