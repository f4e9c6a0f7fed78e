use std::fmt::Display;
use std::str::FromStr;

use cosmos_sdk_proto::cosmos::{
    bank::v1beta1::MsgSend,
    base::v1beta1::Coin,
    crypto::secp256k1::PubKey,
    tx::v1beta1::{mode_info, AuthInfo, Fee, ModeInfo, SignDoc, SignerInfo, Tx, TxBody, TxRaw},
};
use prost::Message;

use crate::error::TxError;
use crate::wallet::PrivateKey;

/// How the signer commits to the transaction contents.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SignMode {
    /// `SIGN_MODE_DIRECT`: sign the protobuf [SignDoc].
    #[default]
    Direct,
    /// `SIGN_MODE_LEGACY_AMINO_JSON`: sign a sorted-key JSON document.
    AminoJson,
}

impl SignMode {
    fn proto_mode(self) -> i32 {
        match self {
            SignMode::Direct => 1,
            SignMode::AminoJson => 127,
        }
    }
}

impl FromStr for SignMode {
    type Err = TxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(SignMode::Direct),
            "amino-json" => Ok(SignMode::AminoJson),
            _ => Err(TxError::SignModeUnknown { mode: s.to_owned() }),
        }
    }
}

impl Display for SignMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            SignMode::Direct => "direct",
            SignMode::AminoJson => "amino-json",
        })
    }
}

/// Everything needed to sign one transaction.
///
/// Built per request and dropped afterwards. Deliberately has no [Debug]
/// implementation since it holds the signing key.
pub struct TxContext {
    pub chain_id: String,
    pub prefix: String,
    pub key: PrivateKey,
    pub account_number: u64,
    pub sequence: u64,
    pub gas_limit: u64,
    pub fee: Vec<Coin>,
    pub sign_mode: SignMode,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
struct AminoCoin {
    amount: String,
    denom: String,
}

impl From<&Coin> for AminoCoin {
    fn from(coin: &Coin) -> Self {
        AminoCoin {
            amount: coin.amount.clone(),
            denom: coin.denom.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
struct AminoMsgSend {
    amount: Vec<AminoCoin>,
    from_address: String,
    to_address: String,
}

/// Legacy amino representation of a message. Fields are declared in sorted order.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "type", content = "value")]
enum AminoMessage {
    #[serde(rename = "cosmos-sdk/MsgSend")]
    Send(AminoMsgSend),
}

#[derive(serde::Serialize)]
struct StdFee {
    amount: Vec<AminoCoin>,
    gas: String,
}

#[derive(serde::Serialize)]
struct StdSignDoc<'a> {
    account_number: String,
    chain_id: &'a str,
    fee: StdFee,
    memo: &'a str,
    msgs: Vec<&'a AminoMessage>,
    sequence: String,
}

/// A message to include in a transaction, with the type URL and its amino form.
#[derive(Clone, Debug)]
pub struct TypedMessage {
    any: cosmos_sdk_proto::Any,
    amino: AminoMessage,
}

impl TypedMessage {
    pub fn type_url(&self) -> &str {
        &self.any.type_url
    }
}

impl From<MsgSend> for TypedMessage {
    fn from(msg: MsgSend) -> Self {
        let amino = AminoMessage::Send(AminoMsgSend {
            amount: msg.amount.iter().map(AminoCoin::from).collect(),
            from_address: msg.from_address.clone(),
            to_address: msg.to_address.clone(),
        });
        TypedMessage {
            any: cosmos_sdk_proto::Any {
                type_url: "/cosmos.bank.v1beta1.MsgSend".to_owned(),
                value: msg.encode_to_vec(),
            },
            amino,
        }
    }
}

/// Transaction builder
///
/// Produces signed transactions for broadcasting and unsigned ones for simulation.
#[derive(Default, Clone, Debug)]
pub struct TxBuilder {
    messages: Vec<TypedMessage>,
    memo: Option<String>,
}

impl TxBuilder {
    /// Add a message to this transaction.
    pub fn add_message(&mut self, msg: impl Into<TypedMessage>) -> &mut Self {
        self.messages.push(msg.into());
        self
    }

    /// Set the memo field.
    pub fn set_memo(&mut self, memo: impl Into<String>) -> &mut Self {
        self.memo = Some(memo.into());
        self
    }

    /// Either set or clear the memo field.
    pub fn set_optional_memo(&mut self, memo: impl Into<Option<String>>) -> &mut Self {
        self.memo = memo.into();
        self
    }

    fn memo(&self) -> &str {
        self.memo.as_deref().unwrap_or_default()
    }

    /// Make a [TxBody] for this builder
    fn make_tx_body(&self) -> TxBody {
        TxBody {
            messages: self.messages.iter().map(|x| x.any.clone()).collect(),
            memo: self.memo().to_owned(),
            timeout_height: 0,
            extension_options: vec![],
            non_critical_extension_options: vec![],
        }
    }

    fn make_signer_infos(key: &PrivateKey, sequence: u64, mode: SignMode) -> Vec<SignerInfo> {
        vec![SignerInfo {
            public_key: Some(cosmos_sdk_proto::Any {
                type_url: key.algorithm().pub_key_type_url().to_owned(),
                value: PubKey {
                    key: key.public_key_bytes().to_vec(),
                }
                .encode_to_vec(),
            }),
            mode_info: Some(ModeInfo {
                sum: Some(mode_info::Sum::Single(mode_info::Single {
                    mode: mode.proto_mode(),
                })),
            }),
            sequence,
        }]
    }

    fn amino_sign_bytes(&self, ctx: &TxContext) -> Result<Vec<u8>, TxError> {
        let doc = StdSignDoc {
            account_number: ctx.account_number.to_string(),
            chain_id: &ctx.chain_id,
            fee: StdFee {
                amount: ctx.fee.iter().map(AminoCoin::from).collect(),
                gas: ctx.gas_limit.to_string(),
            },
            memo: self.memo(),
            msgs: self.messages.iter().map(|x| &x.amino).collect(),
            sequence: ctx.sequence.to_string(),
        };
        Ok(escape_html(serde_json::to_vec(&doc)?))
    }

    /// Sign the transaction, returning the encoded `TxRaw` ready for broadcasting.
    pub fn sign(&self, ctx: &TxContext) -> Result<Vec<u8>, TxError> {
        let body_bytes = self.make_tx_body().encode_to_vec();
        let auth_info_bytes = AuthInfo {
            signer_infos: Self::make_signer_infos(&ctx.key, ctx.sequence, ctx.sign_mode),
            fee: Some(Fee {
                amount: ctx.fee.clone(),
                gas_limit: ctx.gas_limit,
                payer: "".to_owned(),
                granter: "".to_owned(),
            }),
            tip: None,
        }
        .encode_to_vec();

        let sign_bytes = match ctx.sign_mode {
            SignMode::Direct => SignDoc {
                body_bytes: body_bytes.clone(),
                auth_info_bytes: auth_info_bytes.clone(),
                chain_id: ctx.chain_id.clone(),
                account_number: ctx.account_number,
            }
            .encode_to_vec(),
            SignMode::AminoJson => self.amino_sign_bytes(ctx)?,
        };
        let signature = ctx.key.sign_bytes(&sign_bytes)?;

        Ok(TxRaw {
            body_bytes,
            auth_info_bytes,
            signatures: vec![signature],
        }
        .encode_to_vec())
    }

    /// An encoded [Tx] for gas simulation: no fee, zero gas and a placeholder signature.
    pub fn simulation_tx(&self, key: &PrivateKey, sequence: u64, mode: SignMode) -> Vec<u8> {
        Tx {
            body: Some(self.make_tx_body()),
            auth_info: Some(AuthInfo {
                signer_infos: Self::make_signer_infos(key, sequence, mode),
                fee: Some(Fee {
                    amount: vec![],
                    gas_limit: 0,
                    payer: "".to_owned(),
                    granter: "".to_owned(),
                }),
                tip: None,
            }),
            signatures: vec![key.placeholder_signature()],
        }
        .encode_to_vec()
    }
}

/// Escape `&`, `<` and `>` the way Go's `encoding/json` does, which is how
/// nodes serialize the amino sign document they verify against.
///
/// These bytes can only appear inside JSON strings, so rewriting them in the
/// serialized output never changes the structure.
fn escape_html(json: Vec<u8>) -> Vec<u8> {
    if !json.iter().any(|b| matches!(b, b'&' | b'<' | b'>')) {
        return json;
    }
    let mut escaped = Vec::with_capacity(json.len() + 16);
    for byte in json {
        match byte {
            b'&' => escaped.extend_from_slice(br"\u0026"),
            b'<' => escaped.extend_from_slice(br"\u003c"),
            b'>' => escaped.extend_from_slice(br"\u003e"),
            _ => escaped.push(byte),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use bitcoin::hashes::{sha256, Hash};
    use bitcoin::secp256k1::{ecdsa::Signature, Message as SecpMessage, PublicKey, Secp256k1};

    use super::*;
    use crate::wallet::{create_account_from_hex_key, KeyAlgorithm};

    const KEY: &str = "8f2a55949038a9610f50fb23b5883af3b4ecb3c3bb792cbcefbd1542c692be63";

    fn coin(amount: &str) -> Coin {
        Coin {
            denom: "uosmo".to_owned(),
            amount: amount.to_owned(),
        }
    }

    fn context(key: PrivateKey, sign_mode: SignMode) -> TxContext {
        TxContext {
            chain_id: "osmosis-1".to_owned(),
            prefix: "osmo".to_owned(),
            key,
            account_number: 7,
            sequence: 3,
            gas_limit: 100000,
            fee: vec![coin("2500")],
            sign_mode,
        }
    }

    fn builder(from: &str, to: &str) -> TxBuilder {
        let mut builder = TxBuilder::default();
        builder
            .add_message(MsgSend {
                from_address: from.to_owned(),
                to_address: to.to_owned(),
                amount: vec![coin("1000000")],
            })
            .set_memo("hi");
        builder
    }

    fn verify(key: &PrivateKey, sign_bytes: &[u8], signature: &[u8]) {
        let digest = sha256::Hash::hash(sign_bytes);
        Secp256k1::verification_only()
            .verify_ecdsa(
                &SecpMessage::from_slice(digest.as_ref()).unwrap(),
                &Signature::from_compact(signature).unwrap(),
                &PublicKey::from_slice(&key.public_key_bytes()).unwrap(),
            )
            .unwrap();
    }

    fn signer_mode(auth_info: &AuthInfo) -> i32 {
        match auth_info.signer_infos[0].mode_info.as_ref().unwrap().sum {
            Some(mode_info::Sum::Single(mode_info::Single { mode })) => mode,
            _ => panic!("expected a single signer mode"),
        }
    }

    #[test]
    fn parse_sign_modes() {
        assert_eq!("direct".parse::<SignMode>().unwrap(), SignMode::Direct);
        assert_eq!("amino-json".parse::<SignMode>().unwrap(), SignMode::AminoJson);
        assert_eq!(SignMode::default(), SignMode::Direct);
        let err = "textual".parse::<SignMode>().unwrap_err();
        assert!(matches!(err, TxError::SignModeUnknown { mode } if mode == "textual"));
        assert_eq!(SignMode::AminoJson.to_string(), "amino-json");
    }

    #[test]
    fn direct_signature_covers_sign_doc() {
        let key = create_account_from_hex_key(KEY).unwrap();
        let from = key.address("osmo").unwrap().to_string();
        let builder = builder(&from, &from);
        let ctx = context(key.clone(), SignMode::Direct);

        let raw = TxRaw::decode(builder.sign(&ctx).unwrap().as_slice()).unwrap();
        let body = TxBody::decode(raw.body_bytes.as_slice()).unwrap();
        assert_eq!(body.memo, "hi");
        assert_eq!(body.messages.len(), 1);
        assert_eq!(body.messages[0].type_url, "/cosmos.bank.v1beta1.MsgSend");
        let msg = MsgSend::decode(body.messages[0].value.as_slice()).unwrap();
        assert_eq!(msg.amount, vec![coin("1000000")]);

        let auth_info = AuthInfo::decode(raw.auth_info_bytes.as_slice()).unwrap();
        let fee = auth_info.fee.as_ref().unwrap();
        assert_eq!(fee.gas_limit, 100000);
        assert_eq!(fee.amount, vec![coin("2500")]);
        assert_eq!(auth_info.signer_infos[0].sequence, 3);
        assert_eq!(signer_mode(&auth_info), 1);
        let pub_key = auth_info.signer_infos[0].public_key.as_ref().unwrap();
        assert_eq!(pub_key.type_url, "/cosmos.crypto.secp256k1.PubKey");
        assert_eq!(
            PubKey::decode(pub_key.value.as_slice()).unwrap().key,
            key.public_key_bytes().to_vec()
        );

        let sign_doc = SignDoc {
            body_bytes: raw.body_bytes.clone(),
            auth_info_bytes: raw.auth_info_bytes.clone(),
            chain_id: "osmosis-1".to_owned(),
            account_number: 7,
        };
        assert_eq!(raw.signatures.len(), 1);
        verify(&key, &sign_doc.encode_to_vec(), &raw.signatures[0]);
    }

    #[test]
    fn amino_json_signature_covers_sorted_document() {
        let key = create_account_from_hex_key(KEY).unwrap();
        let from = key.address("osmo").unwrap().to_string();
        let to = "osmo1qqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqmcn030";
        let builder = builder(&from, to);
        let ctx = context(key.clone(), SignMode::AminoJson);

        let expected = format!(
            concat!(
                r#"{{"account_number":"7","chain_id":"osmosis-1","#,
                r#""fee":{{"amount":[{{"amount":"2500","denom":"uosmo"}}],"gas":"100000"}},"#,
                r#""memo":"hi","#,
                r#""msgs":[{{"type":"cosmos-sdk/MsgSend","value":{{"amount":[{{"amount":"1000000","denom":"uosmo"}}],"from_address":"{}","to_address":"{}"}}}}],"#,
                r#""sequence":"3"}}"#
            ),
            from, to
        );
        assert_eq!(
            String::from_utf8(builder.amino_sign_bytes(&ctx).unwrap()).unwrap(),
            expected
        );

        let raw = TxRaw::decode(builder.sign(&ctx).unwrap().as_slice()).unwrap();
        let auth_info = AuthInfo::decode(raw.auth_info_bytes.as_slice()).unwrap();
        assert_eq!(signer_mode(&auth_info), 127);
        verify(&key, expected.as_bytes(), &raw.signatures[0]);
    }

    #[test]
    fn amino_json_escapes_markup_like_go() {
        let key = create_account_from_hex_key(KEY).unwrap();
        let mut builder = builder("osmo1from", "osmo1to");
        builder.set_memo("a&b<c>");
        let ctx = context(key.clone(), SignMode::AminoJson);

        let bytes = builder.amino_sign_bytes(&ctx).unwrap();
        let json = String::from_utf8(bytes).unwrap();
        assert!(json.contains(r#""memo":"a\u0026b\u003cc\u003e""#), "{json}");
        assert!(!json.contains(['&', '<', '>']));

        let raw = TxRaw::decode(builder.sign(&ctx).unwrap().as_slice()).unwrap();
        verify(&key, json.as_bytes(), &raw.signatures[0]);
        let body = TxBody::decode(raw.body_bytes.as_slice()).unwrap();
        assert_eq!(body.memo, "a&b<c>");
    }

    #[test]
    fn simulation_tx_has_no_fee() {
        for (algorithm, signature_len) in [
            (KeyAlgorithm::Secp256k1, 64),
            (KeyAlgorithm::EthSecp256k1, 65),
        ] {
            let key = PrivateKey::from_hex(KEY, algorithm).unwrap();
            let builder = builder("a", "b");
            let tx = Tx::decode(
                builder
                    .simulation_tx(&key, 9, SignMode::Direct)
                    .as_slice(),
            )
            .unwrap();
            let auth_info = tx.auth_info.unwrap();
            let fee = auth_info.fee.unwrap();
            assert!(fee.amount.is_empty());
            assert_eq!(fee.gas_limit, 0);
            assert_eq!(auth_info.signer_infos[0].sequence, 9);
            assert_eq!(
                auth_info.signer_infos[0].public_key.as_ref().unwrap().type_url,
                algorithm.pub_key_type_url()
            );
            assert_eq!(tx.signatures, vec![vec![0u8; signature_len]]);
            assert_eq!(tx.body.unwrap().memo, "hi");
        }
    }
}
