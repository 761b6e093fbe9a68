use crate::models::{PlanTier, Token};
use crate::services::{amount, plan};
use anyhow::{bail, Context, Result};
use ethers::types::Address;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_CHAINS: &str = "base,base-testnet,ethereum,ton,solana";
const DEFAULT_PLANS: &str = "starter:10,pro:25,max:100";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Testnet,
    Production,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainKind {
    Evm,
    Ton,
    Solana,
}

impl FromStr for ChainKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "evm" => Ok(ChainKind::Evm),
            "ton" => Ok(ChainKind::Ton),
            "solana" | "svm" => Ok(ChainKind::Solana),
            other => bail!("Unknown chain kind: {}", other),
        }
    }
}

impl ChainKind {
    fn infer(chain_id: &str) -> Self {
        if chain_id.starts_with("ton") {
            ChainKind::Ton
        } else if chain_id.starts_with("solana") {
            ChainKind::Solana
        } else {
            ChainKind::Evm
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenIds {
    pub usdt: String,
    pub usdc: String,
}

impl TokenIds {
    pub fn entries(&self) -> [(Token, &str); 2] {
        [(Token::Usdt, self.usdt.as_str()), (Token::Usdc, self.usdc.as_str())]
    }

    pub fn token_for(&self, id: &str) -> Option<Token> {
        self.entries()
            .into_iter()
            .find(|(_, known)| *known == id)
            .map(|(token, _)| token)
    }

    pub fn token_for_ignore_case(&self, id: &str) -> Option<Token> {
        self.entries()
            .into_iter()
            .find(|(_, known)| known.eq_ignore_ascii_case(id))
            .map(|(token, _)| token)
    }
}

#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub id: String,
    pub kind: ChainKind,
    pub rpc_url: String,
    pub recipient: String,
    pub tokens: TokenIds,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    pub host: String,
    pub port: u16,

    pub redis_url: Option<String>,

    pub chains: BTreeMap<String, ChainConfig>,
    pub plans: Vec<PlanTier>,

    pub webhook_secret: Option<String>,
    pub chain_call_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = Self::parse_environment(var("ENVIRONMENT"))?;

        let chain_ids = var("CHAINS").unwrap_or_else(|| DEFAULT_CHAINS.to_string());
        let mut chains = BTreeMap::new();
        for id in chain_ids.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let chain = Self::parse_chain(id, &var)?;
            chains.insert(chain.id.clone(), chain);
        }

        let config = Self {
            environment,
            host: var("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: var("PORT")
                .unwrap_or_else(|| "8080".to_string())
                .parse()
                .context("Invalid PORT")?,

            redis_url: var("REDIS_URL").filter(|s| !s.is_empty()),

            chains,
            plans: Self::parse_plans(&var("PLAN_PRICES").unwrap_or_else(|| DEFAULT_PLANS.to_string()))?,

            webhook_secret: var("WEBHOOK_SECRET").filter(|s| !s.is_empty()),
            chain_call_timeout: Duration::from_secs(
                var("CHAIN_CALL_TIMEOUT_SECS")
                    .unwrap_or_else(|| "15".to_string())
                    .parse()
                    .context("Invalid CHAIN_CALL_TIMEOUT_SECS")?,
            ),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn chain(&self, id: &str) -> Option<&ChainConfig> {
        self.chains.get(id)
    }

    fn parse_environment(value: Option<String>) -> Result<Environment> {
        let env = value.unwrap_or_else(|| "development".to_string());

        match env.to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "testnet" | "test" => Ok(Environment::Testnet),
            "production" | "prod" => Ok(Environment::Production),
            _ => bail!("Unknown environment: {}", env),
        }
    }

    fn parse_chain<F>(id: &str, var: &F) -> Result<ChainConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let prefix = id.to_uppercase().replace('-', "_");
        let required = |suffix: &str| {
            let key = format!("{}_{}", prefix, suffix);
            var(&key).with_context(|| format!("{} required", key))
        };

        let kind = match var(&format!("{}_KIND", prefix)) {
            Some(kind) => kind.parse()?,
            None => ChainKind::infer(id),
        };

        Ok(ChainConfig {
            id: id.to_string(),
            kind,
            rpc_url: required("RPC_URL")?,
            recipient: required("RECIPIENT")?,
            tokens: TokenIds {
                usdt: required("USDT")?,
                usdc: required("USDC")?,
            },
            api_key: var(&format!("{}_API_KEY", prefix)).filter(|s| !s.is_empty()),
        })
    }

    fn parse_plans(raw: &str) -> Result<Vec<PlanTier>> {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|entry| -> Result<PlanTier> {
                let (name, price) = entry
                    .split_once(':')
                    .with_context(|| format!("Invalid plan entry: {}", entry))?;
                let price = amount::parse_decimal(price)
                    .with_context(|| format!("Invalid price for plan {}", name))?;
                Ok(PlanTier::new(name.trim(), price))
            })
            .collect()
    }

    fn validate(&self) -> Result<()> {
        if self.chains.is_empty() {
            bail!("CHAINS must name at least one chain");
        }

        for chain in self.chains.values() {
            if !chain.rpc_url.starts_with("http") {
                bail!("RPC URL for {} must be HTTP(S) URL", chain.id);
            }
            if chain.kind == ChainKind::Evm {
                for (label, value) in [
                    ("recipient", &chain.recipient),
                    ("USDT contract", &chain.tokens.usdt),
                    ("USDC contract", &chain.tokens.usdc),
                ] {
                    Address::from_str(value)
                        .with_context(|| format!("Invalid {} address for {}", label, chain.id))?;
                }
            }
        }

        for tier in &self.plans {
            if tier.price <= rust_decimal::Decimal::ZERO {
                bail!("Plan {} must have a positive price", tier.name);
            }
        }
        for (a, b) in plan::overlapping_tiers(&self.plans) {
            tracing::warn!("Plan tiers {} and {} have overlapping tolerance bands", a, b);
        }

        tracing::info!(
            "Configuration validated for {:?} environment ({} chains)",
            self.environment,
            self.chains.len()
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_vars() -> HashMap<String, String> {
        [
            ("CHAINS", "base,ton,solana"),
            ("BASE_RPC_URL", "https://mainnet.base.org"),
            ("BASE_RECIPIENT", "0x1111111111111111111111111111111111111111"),
            ("BASE_USDT", "0xfde4C96c8593536E31F229EA8f37b2ADa2699bb2"),
            ("BASE_USDC", "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"),
            ("TON_RPC_URL", "https://toncenter.com/api/v3"),
            ("TON_RECIPIENT", "0:ABCDEF"),
            ("TON_USDT", "0:B113A994B5024A16719F69139328EB759596C38A25F59028B146FECDC3621DFE"),
            ("TON_USDC", "0:C0FFEE"),
            ("TON_API_KEY", "secret"),
            ("SOLANA_RPC_URL", "https://api.mainnet-beta.solana.com"),
            ("SOLANA_RECIPIENT", "MerchantWa11et111111111111111111111111111111"),
            ("SOLANA_USDT", "Es9vMFrzaCERmJfrF4H2FYD4KCoNkY11McCe8BenwNYB"),
            ("SOLANA_USDC", "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    fn load(vars: &HashMap<String, String>) -> Result<Config> {
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn loads_chains_with_inferred_kinds() {
        let config = load(&base_vars()).unwrap();

        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.chains.len(), 3);
        assert_eq!(config.chain("base").unwrap().kind, ChainKind::Evm);
        assert_eq!(config.chain("ton").unwrap().kind, ChainKind::Ton);
        assert_eq!(config.chain("ton").unwrap().api_key.as_deref(), Some("secret"));
        assert_eq!(config.chain("solana").unwrap().kind, ChainKind::Solana);
        assert!(config.chain("ethereum").is_none());
        assert_eq!(config.chain_call_timeout, Duration::from_secs(15));
    }

    #[test]
    fn default_plans_are_starter_pro_max() {
        let config = load(&base_vars()).unwrap();
        let names: Vec<_> = config.plans.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["starter", "pro", "max"]);
        assert_eq!(config.plans[1].price, rust_decimal::Decimal::from(25));
    }

    #[test]
    fn hyphenated_chain_ids_use_underscored_prefix() {
        let mut vars = base_vars();
        vars.insert("CHAINS".into(), "base-testnet".into());
        vars.insert("BASE_TESTNET_RPC_URL".into(), "https://sepolia.base.org".into());
        vars.insert("BASE_TESTNET_RECIPIENT".into(), "0x1111111111111111111111111111111111111111".into());
        vars.insert("BASE_TESTNET_USDT".into(), "0x2222222222222222222222222222222222222222".into());
        vars.insert("BASE_TESTNET_USDC".into(), "0x036CbD53842c5426634e7929541eC2318f3dCF7e".into());

        let config = load(&vars).unwrap();
        assert_eq!(config.chain("base-testnet").unwrap().kind, ChainKind::Evm);
    }

    #[test]
    fn explicit_kind_overrides_inference() {
        let mut vars = base_vars();
        vars.insert("CHAINS".into(), "devnet".into());
        vars.insert("DEVNET_KIND".into(), "solana".into());
        vars.insert("DEVNET_RPC_URL".into(), "https://api.devnet.solana.com".into());
        vars.insert("DEVNET_RECIPIENT".into(), "Wallet".into());
        vars.insert("DEVNET_USDT".into(), "MintT".into());
        vars.insert("DEVNET_USDC".into(), "MintC".into());

        let config = load(&vars).unwrap();
        assert_eq!(config.chain("devnet").unwrap().kind, ChainKind::Solana);
    }

    #[test]
    fn rejects_bad_evm_addresses() {
        let mut vars = base_vars();
        vars.insert("BASE_RECIPIENT".into(), "not-an-address".into());
        assert!(load(&vars).is_err());
    }

    #[test]
    fn rejects_missing_chain_variables() {
        let mut vars = base_vars();
        vars.remove("SOLANA_USDC");
        let err = load(&vars).unwrap_err();
        assert!(err.to_string().contains("SOLANA_USDC"));
    }

    #[test]
    fn rejects_non_positive_plan_prices() {
        let mut vars = base_vars();
        vars.insert("PLAN_PRICES".into(), "free:0".into());
        assert!(load(&vars).is_err());
    }

    #[test]
    fn token_lookup_respects_case_rules() {
        let ids = TokenIds {
            usdt: "0:ABCD".into(),
            usdc: "EPjFWdd5".into(),
        };
        assert_eq!(ids.token_for_ignore_case("0:abcd"), Some(Token::Usdt));
        assert_eq!(ids.token_for("epjfwdd5"), None);
        assert_eq!(ids.token_for("EPjFWdd5"), Some(Token::Usdc));
    }
}
