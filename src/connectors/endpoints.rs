use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::utils::TaxId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown endpoint '{0}'")]
pub struct UnknownEndpoint(pub String);

/// Resource endpoints of the Integra Contador API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    /// Active debt of the micro-entrepreneur (PGMEI).
    #[serde(alias = "pgmei_divida_ativa")]
    Pgmei,
    /// Simples Nacional declarations (PGDAS-D).
    #[serde(alias = "pgdasd_declaracoes")]
    Pgdasd,
    /// Registration certificate data (CCMEI).
    #[serde(alias = "ccmei_dados")]
    Ccmei,
    /// Registration status (CCMEI).
    CcmeiSituacao,
    /// Electronic mailbox.
    CaixaPostal,
    /// Powers of attorney granted to the procurator.
    Procuracoes,
    /// MEI installment plans.
    #[serde(alias = "parcelamentos_mei")]
    Parcmei,
    /// Simples Nacional installment plans.
    #[serde(alias = "parcelamentos_simples")]
    Parcsn,
}

impl Endpoint {
    pub const ALL: [Endpoint; 8] = [
        Endpoint::Pgmei,
        Endpoint::Pgdasd,
        Endpoint::Ccmei,
        Endpoint::CcmeiSituacao,
        Endpoint::CaixaPostal,
        Endpoint::Procuracoes,
        Endpoint::Parcmei,
        Endpoint::Parcsn,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Endpoint::Pgmei => "pgmei",
            Endpoint::Pgdasd => "pgdasd",
            Endpoint::Ccmei => "ccmei",
            Endpoint::CcmeiSituacao => "ccmei_situacao",
            Endpoint::CaixaPostal => "caixa_postal",
            Endpoint::Procuracoes => "procuracoes",
            Endpoint::Parcmei => "parcmei",
            Endpoint::Parcsn => "parcsn",
        }
    }

    fn path_prefix(&self) -> &'static str {
        match self {
            Endpoint::Pgmei => "/pgmei/divida-ativa",
            Endpoint::Pgdasd => "/pgdasd/declaracoes",
            Endpoint::Ccmei => "/ccmei/dados",
            Endpoint::CcmeiSituacao => "/ccmei/situacao-cadastral",
            Endpoint::CaixaPostal => "/caixa-postal/mensagens",
            Endpoint::Procuracoes => "/procuracoes",
            Endpoint::Parcmei => "/parcmei/pedidos",
            Endpoint::Parcsn => "/parcsn/pedidos",
        }
    }

    /// Path relative to the API base URL. `year` only applies to PGDAS-D.
    pub fn path(&self, taxpayer: &TaxId, year: Option<u16>) -> String {
        let mut path = format!("{}/{}", self.path_prefix(), taxpayer);
        if let (Endpoint::Pgdasd, Some(year)) = (self, year) {
            path.push_str(&format!("?ano={}", year));
        }
        path
    }

    /// Path with a `{cnpj}` placeholder, for listings.
    pub fn path_template(&self) -> String {
        format!("{}/{{cnpj}}", self.path_prefix())
    }

    /// Parse a comma separated list, e.g. `"pgmei,pgdasd"`.
    pub fn parse_list(raw: &str) -> Result<Vec<Endpoint>, UnknownEndpoint> {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse)
            .collect()
    }
}

impl FromStr for Endpoint {
    type Err = UnknownEndpoint;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let endpoint = match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "pgmei" | "pgmei_divida_ativa" => Endpoint::Pgmei,
            "pgdasd" | "pgdasd_declaracoes" => Endpoint::Pgdasd,
            "ccmei" | "ccmei_dados" => Endpoint::Ccmei,
            "ccmei_situacao" => Endpoint::CcmeiSituacao,
            "caixa_postal" => Endpoint::CaixaPostal,
            "procuracoes" => Endpoint::Procuracoes,
            "parcmei" | "parcelamentos_mei" => Endpoint::Parcmei,
            "parcsn" | "parcelamentos_simples" => Endpoint::Parcsn,
            _ => return Err(UnknownEndpoint(s.to_string())),
        };
        Ok(endpoint)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn taxpayer() -> TaxId {
        TaxId::parse("49189181000135").unwrap()
    }

    #[test]
    fn test_paths() {
        let id = taxpayer();
        assert_eq!(Endpoint::Pgmei.path(&id, None), "/pgmei/divida-ativa/49189181000135");
        assert_eq!(
            Endpoint::Pgdasd.path(&id, Some(2023)),
            "/pgdasd/declaracoes/49189181000135?ano=2023"
        );
        assert_eq!(Endpoint::Ccmei.path(&id, Some(2023)), "/ccmei/dados/49189181000135");
        assert_eq!(
            Endpoint::CaixaPostal.path(&id, None),
            "/caixa-postal/mensagens/49189181000135"
        );
        assert_eq!(Endpoint::Procuracoes.path_template(), "/procuracoes/{cnpj}");
    }

    #[test]
    fn test_names_round_trip() {
        for endpoint in Endpoint::ALL {
            assert_eq!(endpoint.name().parse::<Endpoint>().unwrap(), endpoint);
            let json = serde_json::to_string(&endpoint).unwrap();
            assert_eq!(json, format!("\"{}\"", endpoint.name()));
        }
    }

    #[test]
    fn test_aliases_and_list_parsing() {
        assert_eq!(
            Endpoint::parse_list("pgmei_divida_ativa, parcelamentos-simples,ccmei").unwrap(),
            vec![Endpoint::Pgmei, Endpoint::Parcsn, Endpoint::Ccmei]
        );
        assert_eq!(
            Endpoint::parse_list("pgmei,nope"),
            Err(UnknownEndpoint("nope".to_string()))
        );
    }
}
