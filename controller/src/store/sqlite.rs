use super::PolicyStore;
use super::entity::{account_usage, speed_limit, tunnel, tunnel_usage, user_account, user_tunnel};
use crate::error::{ControllerError, Result};
use crate::ledger::{AccountSnapshot, UsageSnapshot};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::datetime_from_millis;
use policy::{
    AuditedRecord, FlowMode, GrantId, GrantStatus, SpeedLimitRule, SpeedRuleId, Tunnel, TunnelId,
    TunnelType, UserAccount, UserId, UserTunnelGrant,
};
use rust_decimal::Decimal;
use sea_orm::sea_query::OnConflict;
use sea_orm::*;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use tracing::{info, instrument};

const SCHEMA: [&str; 6] = [
    r#"
        CREATE TABLE IF NOT EXISTS tunnel (
            id INTEGER PRIMARY KEY NOT NULL,
            name TEXT NOT NULL,
            in_node_id INTEGER NOT NULL,
            in_ip TEXT,
            out_node_id INTEGER,
            out_ip TEXT,
            tunnel_type INTEGER NOT NULL,
            flow_mode INTEGER NOT NULL,
            protocol TEXT NOT NULL,
            traffic_ratio TEXT NOT NULL,
            tcp_listen_addr TEXT,
            udp_listen_addr TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
    "#,
    r#"
        CREATE TABLE IF NOT EXISTS user_tunnel (
            id INTEGER PRIMARY KEY NOT NULL,
            user_id INTEGER NOT NULL,
            tunnel_id INTEGER NOT NULL,
            flow INTEGER NOT NULL,
            num INTEGER NOT NULL,
            flow_reset_time INTEGER,
            exp_time INTEGER NOT NULL,
            status INTEGER NOT NULL,
            speed_id INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
    "#,
    r#"
        CREATE TABLE IF NOT EXISTS speed_limit (
            id INTEGER PRIMARY KEY NOT NULL,
            name TEXT NOT NULL,
            tunnel_id INTEGER NOT NULL,
            speed_mbps INTEGER NOT NULL
        )
    "#,
    r#"
        CREATE TABLE IF NOT EXISTS tunnel_usage (
            grant_id INTEGER PRIMARY KEY NOT NULL,
            upload_bytes INTEGER NOT NULL,
            download_bytes INTEGER NOT NULL,
            billed_bytes INTEGER NOT NULL,
            flow_limit INTEGER NOT NULL,
            active_forwards INTEGER NOT NULL,
            next_reset_at INTEGER,
            last_reset_at INTEGER,
            last_sequence INTEGER,
            revision INTEGER NOT NULL
        )
    "#,
    r#"
        CREATE TABLE IF NOT EXISTS user_account (
            id INTEGER PRIMARY KEY NOT NULL,
            name TEXT NOT NULL,
            flow INTEGER NOT NULL,
            num INTEGER NOT NULL,
            flow_reset_day INTEGER NOT NULL,
            exp_time INTEGER NOT NULL,
            status INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
    "#,
    r#"
        CREATE TABLE IF NOT EXISTS account_usage (
            user_id INTEGER PRIMARY KEY NOT NULL,
            upload_bytes INTEGER NOT NULL,
            download_bytes INTEGER NOT NULL,
            billed_bytes INTEGER NOT NULL,
            flow_limit INTEGER NOT NULL,
            next_reset_at INTEGER,
            last_reset_at INTEGER,
            revision INTEGER NOT NULL
        )
    "#,
];

const UPSERT_USAGE_SQL: &str = r#"
    INSERT INTO tunnel_usage (
        grant_id, upload_bytes, download_bytes, billed_bytes, flow_limit,
        active_forwards, next_reset_at, last_reset_at, last_sequence, revision
    )
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(grant_id) DO UPDATE SET
        upload_bytes = excluded.upload_bytes,
        download_bytes = excluded.download_bytes,
        billed_bytes = excluded.billed_bytes,
        flow_limit = excluded.flow_limit,
        active_forwards = excluded.active_forwards,
        next_reset_at = excluded.next_reset_at,
        last_reset_at = excluded.last_reset_at,
        last_sequence = excluded.last_sequence,
        revision = excluded.revision
    WHERE excluded.revision > tunnel_usage.revision
"#;

const UPSERT_ACCOUNT_USAGE_SQL: &str = r#"
    INSERT INTO account_usage (
        user_id, upload_bytes, download_bytes, billed_bytes, flow_limit,
        next_reset_at, last_reset_at, revision
    )
    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(user_id) DO UPDATE SET
        upload_bytes = excluded.upload_bytes,
        download_bytes = excluded.download_bytes,
        billed_bytes = excluded.billed_bytes,
        flow_limit = excluded.flow_limit,
        next_reset_at = excluded.next_reset_at,
        last_reset_at = excluded.last_reset_at,
        revision = excluded.revision
    WHERE excluded.revision > account_usage.revision
"#;

/// SQLite-backed store.
pub struct SqliteStore {
    db: DatabaseConnection,
}

impl SqliteStore {
    #[instrument(skip(database_path))]
    pub async fn connect<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        let database_path = database_path.as_ref();

        if let Some(parent) = database_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let database_url = format!("sqlite:{}?mode=rwc", database_path.display());
        let db = Database::connect(&database_url).await?;

        for create_table_sql in SCHEMA {
            db.execute(Statement::from_string(
                db.get_database_backend(),
                create_table_sql.to_string(),
            ))
            .await?;
        }

        info!("Connected to SQLite database: {}", database_path.display());

        Ok(Self { db })
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn to_u64(value: i64, column: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| ControllerError::Corrupt(format!("{} is negative: {}", column, value)))
}

fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn optional_instant(millis: Option<i64>) -> Result<Option<DateTime<Utc>>> {
    Ok(millis.map(datetime_from_millis).transpose()?)
}

fn tunnel_from_model(m: tunnel::Model) -> Result<Tunnel> {
    let traffic_ratio = Decimal::from_str(&m.traffic_ratio).map_err(|e| {
        ControllerError::Corrupt(format!("tunnel {} traffic_ratio {:?}: {}", m.id, m.traffic_ratio, e))
    })?;
    Ok(Tunnel {
        record: AuditedRecord {
            id: m.id,
            created_at: datetime_from_millis(m.created_at)?,
            updated_at: datetime_from_millis(m.updated_at)?,
        },
        name: m.name,
        in_node_id: m.in_node_id,
        in_ip: m.in_ip,
        out_node_id: m.out_node_id,
        out_ip: m.out_ip,
        tunnel_type: TunnelType::try_from(m.tunnel_type)?,
        flow_mode: FlowMode::try_from(m.flow_mode)?,
        protocol: m.protocol,
        traffic_ratio,
        tcp_listen_addr: m.tcp_listen_addr,
        udp_listen_addr: m.udp_listen_addr,
    })
}

fn grant_from_model(m: user_tunnel::Model) -> Result<UserTunnelGrant> {
    Ok(UserTunnelGrant {
        record: AuditedRecord {
            id: m.id,
            created_at: datetime_from_millis(m.created_at)?,
            updated_at: datetime_from_millis(m.updated_at)?,
        },
        user_id: m.user_id,
        tunnel_id: m.tunnel_id,
        flow: to_u64(m.flow, "user_tunnel.flow")?,
        num: u32::try_from(m.num)
            .map_err(|_| ControllerError::Corrupt(format!("user_tunnel.num out of range: {}", m.num)))?,
        flow_reset_time: optional_instant(m.flow_reset_time)?,
        exp_time: datetime_from_millis(m.exp_time)?,
        status: GrantStatus::try_from(m.status)?,
        speed_id: m.speed_id,
    })
}

fn usage_from_model(m: tunnel_usage::Model) -> Result<UsageSnapshot> {
    Ok(UsageSnapshot {
        grant_id: m.grant_id,
        upload_bytes: to_u64(m.upload_bytes, "tunnel_usage.upload_bytes")?,
        download_bytes: to_u64(m.download_bytes, "tunnel_usage.download_bytes")?,
        billed_bytes: to_u64(m.billed_bytes, "tunnel_usage.billed_bytes")?,
        flow_limit: to_u64(m.flow_limit, "tunnel_usage.flow_limit")?,
        active_forwards: u32::try_from(m.active_forwards).unwrap_or(u32::MAX),
        next_reset_at: optional_instant(m.next_reset_at)?,
        last_reset_at: optional_instant(m.last_reset_at)?,
        last_sequence: m.last_sequence.map(|s| to_u64(s, "tunnel_usage.last_sequence")).transpose()?,
        revision: to_u64(m.revision, "tunnel_usage.revision")?,
    })
}

fn account_from_model(m: user_account::Model) -> Result<UserAccount> {
    Ok(UserAccount {
        record: AuditedRecord {
            id: m.id,
            created_at: datetime_from_millis(m.created_at)?,
            updated_at: datetime_from_millis(m.updated_at)?,
        },
        name: m.name,
        flow: to_u64(m.flow, "user_account.flow")?,
        num: u32::try_from(m.num)
            .map_err(|_| ControllerError::Corrupt(format!("user_account.num out of range: {}", m.num)))?,
        flow_reset_day: u32::try_from(m.flow_reset_day).map_err(|_| {
            ControllerError::Corrupt(format!("user_account.flow_reset_day out of range: {}", m.flow_reset_day))
        })?,
        exp_time: datetime_from_millis(m.exp_time)?,
        status: GrantStatus::try_from(m.status)?,
    })
}

fn account_usage_from_model(m: account_usage::Model) -> Result<AccountSnapshot> {
    Ok(AccountSnapshot {
        user_id: m.user_id,
        upload_bytes: to_u64(m.upload_bytes, "account_usage.upload_bytes")?,
        download_bytes: to_u64(m.download_bytes, "account_usage.download_bytes")?,
        billed_bytes: to_u64(m.billed_bytes, "account_usage.billed_bytes")?,
        flow_limit: to_u64(m.flow_limit, "account_usage.flow_limit")?,
        next_reset_at: optional_instant(m.next_reset_at)?,
        last_reset_at: optional_instant(m.last_reset_at)?,
        revision: to_u64(m.revision, "account_usage.revision")?,
    })
}

#[async_trait]
impl PolicyStore for SqliteStore {
    #[instrument(skip(self))]
    async fn load_tunnels(&self) -> Result<Vec<Tunnel>> {
        tunnel::Entity::find()
            .all(&self.db)
            .await?
            .into_iter()
            .map(tunnel_from_model)
            .collect()
    }

    #[instrument(skip(self))]
    async fn load_grants(&self) -> Result<Vec<UserTunnelGrant>> {
        user_tunnel::Entity::find()
            .all(&self.db)
            .await?
            .into_iter()
            .map(grant_from_model)
            .collect()
    }

    #[instrument(skip(self))]
    async fn load_speed_rules(&self) -> Result<Vec<SpeedLimitRule>> {
        speed_limit::Entity::find()
            .all(&self.db)
            .await?
            .into_iter()
            .map(|m| {
                Ok(SpeedLimitRule {
                    id: m.id,
                    name: m.name,
                    tunnel_id: m.tunnel_id,
                    speed_mbps: to_u64(m.speed_mbps, "speed_limit.speed_mbps")?,
                })
            })
            .collect()
    }

    #[instrument(skip(self))]
    async fn load_usage(&self) -> Result<Vec<UsageSnapshot>> {
        tunnel_usage::Entity::find()
            .all(&self.db)
            .await?
            .into_iter()
            .map(usage_from_model)
            .collect()
    }

    #[instrument(skip(self))]
    async fn load_users(&self) -> Result<Vec<UserAccount>> {
        user_account::Entity::find()
            .all(&self.db)
            .await?
            .into_iter()
            .map(account_from_model)
            .collect()
    }

    #[instrument(skip(self))]
    async fn load_account_usage(&self) -> Result<Vec<AccountSnapshot>> {
        account_usage::Entity::find()
            .all(&self.db)
            .await?
            .into_iter()
            .map(account_usage_from_model)
            .collect()
    }

    #[instrument(skip(self, tunnel), fields(tunnel_id = tunnel.id()))]
    async fn save_tunnel(&self, tunnel: &Tunnel) -> Result<()> {
        let model = tunnel::ActiveModel {
            id: Set(tunnel.id()),
            name: Set(tunnel.name.clone()),
            in_node_id: Set(tunnel.in_node_id),
            in_ip: Set(tunnel.in_ip.clone()),
            out_node_id: Set(tunnel.out_node_id),
            out_ip: Set(tunnel.out_ip.clone()),
            tunnel_type: Set(tunnel.tunnel_type.code()),
            flow_mode: Set(tunnel.flow_mode.code()),
            protocol: Set(tunnel.protocol.clone()),
            traffic_ratio: Set(tunnel.traffic_ratio.to_string()),
            tcp_listen_addr: Set(tunnel.tcp_listen_addr.clone()),
            udp_listen_addr: Set(tunnel.udp_listen_addr.clone()),
            created_at: Set(millis(tunnel.record.created_at)),
            updated_at: Set(millis(tunnel.record.updated_at)),
        };
        tunnel::Entity::insert(model)
            .on_conflict(
                OnConflict::column(tunnel::Column::Id)
                    .update_columns([
                        tunnel::Column::Name,
                        tunnel::Column::InNodeId,
                        tunnel::Column::InIp,
                        tunnel::Column::OutNodeId,
                        tunnel::Column::OutIp,
                        tunnel::Column::TunnelType,
                        tunnel::Column::FlowMode,
                        tunnel::Column::Protocol,
                        tunnel::Column::TrafficRatio,
                        tunnel::Column::TcpListenAddr,
                        tunnel::Column::UdpListenAddr,
                        tunnel::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_tunnel(&self, tunnel_id: TunnelId) -> Result<()> {
        tunnel::Entity::delete_by_id(tunnel_id).exec(&self.db).await?;
        Ok(())
    }

    #[instrument(skip(self, grant), fields(grant_id = grant.id()))]
    async fn save_grant(&self, grant: &UserTunnelGrant) -> Result<()> {
        let model = user_tunnel::ActiveModel {
            id: Set(grant.id()),
            user_id: Set(grant.user_id),
            tunnel_id: Set(grant.tunnel_id),
            flow: Set(to_i64(grant.flow)),
            num: Set(i64::from(grant.num)),
            flow_reset_time: Set(grant.flow_reset_time.map(millis)),
            exp_time: Set(millis(grant.exp_time)),
            status: Set(grant.status.code()),
            speed_id: Set(grant.speed_id),
            created_at: Set(millis(grant.record.created_at)),
            updated_at: Set(millis(grant.record.updated_at)),
        };
        user_tunnel::Entity::insert(model)
            .on_conflict(
                OnConflict::column(user_tunnel::Column::Id)
                    .update_columns([
                        user_tunnel::Column::UserId,
                        user_tunnel::Column::TunnelId,
                        user_tunnel::Column::Flow,
                        user_tunnel::Column::Num,
                        user_tunnel::Column::FlowResetTime,
                        user_tunnel::Column::ExpTime,
                        user_tunnel::Column::Status,
                        user_tunnel::Column::SpeedId,
                        user_tunnel::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_grant(&self, grant_id: GrantId) -> Result<()> {
        let txn = self.db.begin().await?;
        tunnel_usage::Entity::delete_by_id(grant_id).exec(&txn).await?;
        user_tunnel::Entity::delete_by_id(grant_id).exec(&txn).await?;
        txn.commit().await?;
        Ok(())
    }

    #[instrument(skip(self, rule), fields(rule_id = rule.id))]
    async fn save_speed_rule(&self, rule: &SpeedLimitRule) -> Result<()> {
        let model = speed_limit::ActiveModel {
            id: Set(rule.id),
            name: Set(rule.name.clone()),
            tunnel_id: Set(rule.tunnel_id),
            speed_mbps: Set(to_i64(rule.speed_mbps)),
        };
        speed_limit::Entity::insert(model)
            .on_conflict(
                OnConflict::column(speed_limit::Column::Id)
                    .update_columns([
                        speed_limit::Column::Name,
                        speed_limit::Column::TunnelId,
                        speed_limit::Column::SpeedMbps,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_speed_rule(&self, rule_id: SpeedRuleId) -> Result<()> {
        speed_limit::Entity::delete_by_id(rule_id).exec(&self.db).await?;
        Ok(())
    }

    #[instrument(skip(self, usage), fields(grant_id = usage.grant_id, revision = usage.revision))]
    async fn save_usage(&self, usage: &UsageSnapshot) -> Result<()> {
        let values: Vec<Value> = vec![
            usage.grant_id.into(),
            to_i64(usage.upload_bytes).into(),
            to_i64(usage.download_bytes).into(),
            to_i64(usage.billed_bytes).into(),
            to_i64(usage.flow_limit).into(),
            i64::from(usage.active_forwards).into(),
            usage.next_reset_at.map(millis).into(),
            usage.last_reset_at.map(millis).into(),
            usage.last_sequence.map(to_i64).into(),
            to_i64(usage.revision).into(),
        ];
        self.db
            .execute(Statement::from_sql_and_values(
                self.db.get_database_backend(),
                UPSERT_USAGE_SQL,
                values,
            ))
            .await?;
        Ok(())
    }

    #[instrument(skip(self, account), fields(user_id = account.id()))]
    async fn save_user(&self, account: &UserAccount) -> Result<()> {
        let model = user_account::ActiveModel {
            id: Set(account.id()),
            name: Set(account.name.clone()),
            flow: Set(to_i64(account.flow)),
            num: Set(i64::from(account.num)),
            flow_reset_day: Set(i64::from(account.flow_reset_day)),
            exp_time: Set(millis(account.exp_time)),
            status: Set(account.status.code()),
            created_at: Set(millis(account.record.created_at)),
            updated_at: Set(millis(account.record.updated_at)),
        };
        user_account::Entity::insert(model)
            .on_conflict(
                OnConflict::column(user_account::Column::Id)
                    .update_columns([
                        user_account::Column::Name,
                        user_account::Column::Flow,
                        user_account::Column::Num,
                        user_account::Column::FlowResetDay,
                        user_account::Column::ExpTime,
                        user_account::Column::Status,
                        user_account::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_user(&self, user_id: UserId) -> Result<()> {
        let txn = self.db.begin().await?;
        account_usage::Entity::delete_by_id(user_id).exec(&txn).await?;
        user_account::Entity::delete_by_id(user_id).exec(&txn).await?;
        txn.commit().await?;
        Ok(())
    }

    #[instrument(skip(self, usage), fields(user_id = usage.user_id, revision = usage.revision))]
    async fn save_account_usage(&self, usage: &AccountSnapshot) -> Result<()> {
        let values: Vec<Value> = vec![
            usage.user_id.into(),
            to_i64(usage.upload_bytes).into(),
            to_i64(usage.download_bytes).into(),
            to_i64(usage.billed_bytes).into(),
            to_i64(usage.flow_limit).into(),
            usage.next_reset_at.map(millis).into(),
            usage.last_reset_at.map(millis).into(),
            to_i64(usage.revision).into(),
        ];
        self.db
            .execute(Statement::from_sql_and_values(
                self.db.get_database_backend(),
                UPSERT_ACCOUNT_USAGE_SQL,
                values,
            ))
            .await?;
        Ok(())
    }
}
