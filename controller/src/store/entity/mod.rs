pub mod account_usage;
pub mod speed_limit;
pub mod tunnel;
pub mod tunnel_usage;
pub mod user_account;
pub mod user_tunnel;
