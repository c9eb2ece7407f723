//! Typed views over the endpoint responses.
//!
//! Each endpoint answers with its own JSON shape, usually wrapped in an
//! envelope: `{"data": {...}}`, `{"dados": {...}}` or `{"dados": "<json>"}`.
//! [`parse_payload`] unwraps the envelope and decodes the body into the
//! variant for that endpoint. A malformed body only fails its own endpoint.

use rust_decimal::Decimal;
use serde::de::{self, DeserializeOwned, Deserializer};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::str::FromStr;
use thiserror::Error;

use crate::connectors::endpoints::Endpoint;

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("unexpected payload shape: {0}")]
    Shape(String),
    #[error("payload does not match the {endpoint} schema: {source}")]
    Schema {
        endpoint: Endpoint,
        #[source]
        source: serde_json::Error,
    },
}

/// Parse a monetary amount without going through binary floating point.
///
/// Accepts `1234.56`, `"1234.56"`, `"1.234,56"` and `"R$ 1.234,56"`.
pub fn parse_money(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw
        .trim()
        .trim_start_matches("R$")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    let normalised = if cleaned.contains(',') {
        cleaned.replace('.', "").replace(',', ".")
    } else {
        cleaned
    };
    Decimal::from_str(&normalised)
        .or_else(|_| Decimal::from_scientific(&normalised))
        .ok()
}

fn money_from_value(value: &Value) -> Result<Option<Decimal>, String> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                return Ok(Some(Decimal::from(i)));
            }
            // Shortest round-trip text of the number, e.g. "100.5".
            parse_money(&n.to_string())
                .map(Some)
                .ok_or_else(|| format!("invalid amount {}", n))
        }
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => parse_money(s)
            .map(Some)
            .ok_or_else(|| format!("invalid amount '{}'", s)),
        other => Err(format!("invalid amount {}", other)),
    }
}

fn money<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    money_from_value(&value).map_err(de::Error::custom)
}

/// Periods arrive both as `"202301"` and as `202301`.
fn text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) => Ok(Some(n.to_string())),
        other => Err(de::Error::custom(format!("expected text, got {}", other))),
    }
}

/// PGMEI active debt.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ActiveDebt {
    #[serde(rename = "valor_total_dividas", default, deserialize_with = "money")]
    pub total: Option<Decimal>,
    #[serde(rename = "dividas", default)]
    pub items: Vec<DebtItem>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DebtItem {
    #[serde(rename = "periodo_apuracao", default, deserialize_with = "text")]
    pub period: Option<String>,
    #[serde(rename = "valor", alias = "valor_total", default, deserialize_with = "money")]
    pub amount: Option<Decimal>,
}

impl ActiveDebt {
    /// Declared total when present, otherwise the sum of the items.
    pub fn amount(&self) -> Decimal {
        match self.total {
            Some(total) => total,
            None => self.items.iter().filter_map(|i| i.amount).sum(),
        }
    }
}

/// PGDAS-D declarations.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeclarationList {
    #[serde(rename = "declaracoes", default)]
    pub declarations: Vec<Declaration>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Declaration {
    #[serde(rename = "periodo", default, deserialize_with = "text")]
    pub period: Option<String>,
    #[serde(rename = "situacao", default)]
    pub status: Option<String>,
}

impl DeclarationList {
    /// Years (`"YYYY"`) with at least one declaration marked `PENDENTE`.
    pub fn pending_years(&self) -> BTreeSet<String> {
        self.declarations
            .iter()
            .filter(|d| {
                d.status
                    .as_deref()
                    .map(|s| s.trim().eq_ignore_ascii_case("PENDENTE"))
                    .unwrap_or(false)
            })
            .filter_map(|d| d.period.as_deref())
            .filter(|p| p.len() >= 4 && p.as_bytes()[..4].iter().all(u8::is_ascii_digit))
            .map(|p| p[..4].to_string())
            .collect()
    }
}

/// CCMEI registration data.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RegistrationData {
    #[serde(rename = "nome_empresarial", default)]
    pub company_name: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub cnpj: Option<String>,
    #[serde(rename = "situacao", default)]
    pub status: Option<String>,
    #[serde(rename = "data_abertura", default)]
    pub opened_on: Option<String>,
}

/// CCMEI registration status.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RegistrationStatus {
    #[serde(rename = "situacao", default)]
    pub status: Option<String>,
}

impl RegistrationStatus {
    pub fn is_mei(&self) -> bool {
        self.status
            .as_deref()
            .map(|s| s.to_uppercase().contains("MEI"))
            .unwrap_or(false)
    }
}

/// Electronic mailbox.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Mailbox {
    #[serde(rename = "quantidade_nao_lidas", default)]
    pub unread_total: Option<u32>,
    #[serde(rename = "mensagens", default)]
    pub messages: Vec<MailboxMessage>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MailboxMessage {
    #[serde(rename = "assunto", default)]
    pub subject: Option<String>,
    #[serde(rename = "lida", default)]
    pub read: Option<bool>,
}

impl Mailbox {
    /// Messages without a `lida` flag count as unread.
    pub fn unread(&self) -> u32 {
        self.unread_total.unwrap_or_else(|| {
            self.messages
                .iter()
                .filter(|m| !m.read.unwrap_or(false))
                .count() as u32
        })
    }
}

/// Powers of attorney granted to the procurator.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PowerOfAttorneyList {
    #[serde(rename = "procuracoes", default)]
    pub grants: Vec<PowerOfAttorney>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PowerOfAttorney {
    #[serde(rename = "situacao", default)]
    pub status: Option<String>,
    #[serde(rename = "data_fim", default)]
    pub valid_until: Option<String>,
}

impl PowerOfAttorneyList {
    pub fn active(&self) -> u32 {
        self.grants
            .iter()
            .filter(|g| match g.status.as_deref() {
                None => true,
                Some(s) => matches!(s.trim().to_uppercase().as_str(), "ATIVA" | "ATIVO" | "VIGENTE"),
            })
            .count() as u32
    }
}

/// Installment plans (PARCMEI / PARCSN).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InstallmentList {
    #[serde(rename = "pedidos", default)]
    pub requests: Vec<Installment>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Installment {
    #[serde(rename = "numero", default, deserialize_with = "text")]
    pub number: Option<String>,
    #[serde(rename = "situacao", default)]
    pub status: Option<String>,
    #[serde(rename = "saldo_devedor", default, deserialize_with = "money")]
    pub outstanding: Option<Decimal>,
}

const CLOSED_INSTALLMENT_MARKERS: [&str; 4] = ["ENCERRAD", "LIQUIDAD", "CANCELAD", "REJEITAD"];

impl Installment {
    pub fn is_open(&self) -> bool {
        let status = self.status.as_deref().unwrap_or("").to_uppercase();
        !CLOSED_INSTALLMENT_MARKERS.iter().any(|m| status.contains(m))
    }
}

impl InstallmentList {
    pub fn open_count(&self) -> u32 {
        self.requests.iter().filter(|r| r.is_open()).count() as u32
    }

    pub fn outstanding(&self) -> Decimal {
        self.requests
            .iter()
            .filter(|r| r.is_open())
            .filter_map(|r| r.outstanding)
            .sum()
    }
}

/// Decoded body of one endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum EndpointPayload {
    ActiveDebt(ActiveDebt),
    Declarations(DeclarationList),
    Registration(RegistrationData),
    RegistrationStatus(RegistrationStatus),
    Mailbox(Mailbox),
    PowersOfAttorney(PowerOfAttorneyList),
    Installments(InstallmentList),
}

impl EndpointPayload {
    /// Contribution to the consolidated open debt. Only PGMEI reports debt;
    /// balances under an installment plan are tracked apart.
    pub fn debt_amount(&self) -> Decimal {
        match self {
            EndpointPayload::ActiveDebt(d) => d.amount(),
            _ => Decimal::ZERO,
        }
    }

    /// Outstanding balance of open installment plans.
    pub fn installment_balance(&self) -> Decimal {
        match self {
            EndpointPayload::Installments(i) => i.outstanding(),
            _ => Decimal::ZERO,
        }
    }
}

fn unwrap_envelope(raw: &Value) -> Result<Value, PayloadError> {
    if let Some(inner @ Value::Object(_)) = raw.get("data") {
        return Ok(inner.clone());
    }
    match raw.get("dados") {
        Some(inner @ Value::Object(_)) => return Ok(inner.clone()),
        Some(Value::String(encoded)) => {
            return serde_json::from_str(encoded)
                .map_err(|e| PayloadError::Shape(format!("dados is not valid JSON: {}", e)))
        }
        _ => {}
    }
    match raw {
        Value::Object(_) => Ok(raw.clone()),
        Value::Null => Err(PayloadError::Shape("empty body".to_string())),
        other => Err(PayloadError::Shape(format!("expected an object, got {}", other))),
    }
}

fn decode<T: DeserializeOwned>(endpoint: Endpoint, body: Value) -> Result<T, PayloadError> {
    serde_json::from_value(body).map_err(|source| PayloadError::Schema { endpoint, source })
}

/// Decode the raw response of `endpoint`.
pub fn parse_payload(endpoint: Endpoint, raw: &Value) -> Result<EndpointPayload, PayloadError> {
    let body = unwrap_envelope(raw)?;
    let payload = match endpoint {
        Endpoint::Pgmei => EndpointPayload::ActiveDebt(decode(endpoint, body)?),
        Endpoint::Pgdasd => EndpointPayload::Declarations(decode(endpoint, body)?),
        Endpoint::Ccmei => EndpointPayload::Registration(decode(endpoint, body)?),
        Endpoint::CcmeiSituacao => EndpointPayload::RegistrationStatus(decode(endpoint, body)?),
        Endpoint::CaixaPostal => EndpointPayload::Mailbox(decode(endpoint, body)?),
        Endpoint::Procuracoes => EndpointPayload::PowersOfAttorney(decode(endpoint, body)?),
        Endpoint::Parcmei | Endpoint::Parcsn => EndpointPayload::Installments(decode(endpoint, body)?),
    };
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_parse_money_formats() {
        assert_eq!(parse_money("1234.56"), Some(dec("1234.56")));
        assert_eq!(parse_money("1.234,56"), Some(dec("1234.56")));
        assert_eq!(parse_money("R$ 1.234,56"), Some(dec("1234.56")));
        assert_eq!(parse_money(""), None);
        assert_eq!(parse_money("abc"), None);
    }

    #[test]
    fn test_pgmei_total_from_number_is_exact() {
        let raw = json!({"data": {"valor_total_dividas": 100.50, "dividas": []}});
        let payload = parse_payload(Endpoint::Pgmei, &raw).unwrap();
        assert_eq!(payload.debt_amount(), dec("100.50"));
    }

    #[test]
    fn test_pgmei_sums_items_without_total() {
        let raw = json!({"data": {"dividas": [
            {"periodo_apuracao": "202301", "valor": "10,10"},
            {"periodo_apuracao": 202302, "valor_total": 0.2}
        ]}});
        let payload = parse_payload(Endpoint::Pgmei, &raw).unwrap();
        assert_eq!(payload.debt_amount(), dec("10.30"));
    }

    #[test]
    fn test_pgdasd_pending_years_are_deduplicated() {
        let raw = json!({"data": {"declaracoes": [
            {"periodo": "202301", "situacao": "PENDENTE"},
            {"periodo": "202305", "situacao": "pendente"},
            {"periodo": 202203, "situacao": "PENDENTE"},
            {"periodo": "202101", "situacao": "ENTREGUE"}
        ]}});
        match parse_payload(Endpoint::Pgdasd, &raw).unwrap() {
            EndpointPayload::Declarations(list) => {
                let years: Vec<_> = list.pending_years().into_iter().collect();
                assert_eq!(years, vec!["2022".to_string(), "2023".to_string()]);
            }
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn test_dados_envelope_as_json_string() {
        let raw = json!({
            "status": 200,
            "dados": "{\"situacao\": \"ATIVA - MEI\"}",
            "mensagens": []
        });
        match parse_payload(Endpoint::CcmeiSituacao, &raw).unwrap() {
            EndpointPayload::RegistrationStatus(status) => assert!(status.is_mei()),
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn test_null_registration_status_is_not_malformed() {
        for raw in [json!({"data": {"situacao": null}}), json!({"data": {}})] {
            match parse_payload(Endpoint::CcmeiSituacao, &raw).unwrap() {
                EndpointPayload::RegistrationStatus(status) => {
                    assert_eq!(status.status, None);
                    assert!(!status.is_mei());
                }
                other => panic!("unexpected payload: {:?}", other),
            }
        }
    }

    #[test]
    fn test_mailbox_counts() {
        let explicit = json!({"data": {"quantidade_nao_lidas": 4}});
        let listed = json!({"data": {"mensagens": [
            {"assunto": "a", "lida": true},
            {"assunto": "b", "lida": false},
            {"assunto": "c"}
        ]}});
        for (raw, expected) in [(explicit, 4), (listed, 2)] {
            match parse_payload(Endpoint::CaixaPostal, &raw).unwrap() {
                EndpointPayload::Mailbox(m) => assert_eq!(m.unread(), expected),
                other => panic!("unexpected payload: {:?}", other),
            }
        }
    }

    #[test]
    fn test_active_powers_of_attorney() {
        let raw = json!({"procuracoes": [
            {"situacao": "ATIVA"},
            {"situacao": "VENCIDA"},
            {"data_fim": "2030-01-01"}
        ]});
        match parse_payload(Endpoint::Procuracoes, &raw).unwrap() {
            EndpointPayload::PowersOfAttorney(list) => assert_eq!(list.active(), 2),
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn test_installments_skip_closed_plans() {
        let raw = json!({"data": {"pedidos": [
            {"numero": 1, "situacao": "EM PARCELAMENTO", "saldo_devedor": "144,90"},
            {"numero": 2, "situacao": "ENCERRADO", "saldo_devedor": 999}
        ]}});
        let payload = parse_payload(Endpoint::Parcmei, &raw).unwrap();
        assert_eq!(payload.installment_balance(), dec("144.90"));
        assert_eq!(payload.debt_amount(), Decimal::ZERO);
        match payload {
            EndpointPayload::Installments(list) => assert_eq!(list.open_count(), 1),
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn test_malformed_payloads_are_errors() {
        assert!(matches!(
            parse_payload(Endpoint::Pgmei, &Value::Null),
            Err(PayloadError::Shape(_))
        ));
        assert!(matches!(
            parse_payload(Endpoint::Pgdasd, &json!({"declaracoes": "nope"})),
            Err(PayloadError::Schema { .. })
        ));
        assert!(matches!(
            parse_payload(Endpoint::Pgmei, &json!({"valor_total_dividas": "lots"})),
            Err(PayloadError::Schema { .. })
        ));
    }
}
