use cosmos_sdk_proto::cosmos::{
    auth::v1beta1::{QueryAccountRequest, QueryAccountResponse},
    bank::v1beta1::{QueryAllBalancesRequest, QueryAllBalancesResponse},
    staking::v1beta1::{
        QueryDelegatorDelegationsRequest, QueryDelegatorDelegationsResponse,
        QueryValidatorsRequest, QueryValidatorsResponse,
    },
    tx::v1beta1::{SimulateRequest, SimulateResponse},
};

use super::PolymorphicFields;

/// A unary query the [super::Bridge] can send through `abci_query`.
pub trait BridgeRequest: prost::Message + Sized {
    /// Fully qualified gRPC method, used as the ABCI query path.
    const PATH: &'static str;

    type Response: prost::Message + Default + PolymorphicFields;
}

impl BridgeRequest for QueryAccountRequest {
    const PATH: &'static str = "/cosmos.auth.v1beta1.Query/Account";
    type Response = QueryAccountResponse;
}

impl BridgeRequest for QueryAllBalancesRequest {
    const PATH: &'static str = "/cosmos.bank.v1beta1.Query/AllBalances";
    type Response = QueryAllBalancesResponse;
}

impl BridgeRequest for QueryDelegatorDelegationsRequest {
    const PATH: &'static str = "/cosmos.staking.v1beta1.Query/DelegatorDelegations";
    type Response = QueryDelegatorDelegationsResponse;
}

impl BridgeRequest for QueryValidatorsRequest {
    const PATH: &'static str = "/cosmos.staking.v1beta1.Query/Validators";
    type Response = QueryValidatorsResponse;
}

impl BridgeRequest for SimulateRequest {
    const PATH: &'static str = "/cosmos.tx.v1beta1.Service/Simulate";
    type Response = SimulateResponse;
}
