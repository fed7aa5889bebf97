//! Control API
//!
//! One endpoint: `POST /tools` with `{tool, params}`, answering
//! `{success, data?, error?}`. Each tool maps 1:1 to a slot-engine or
//! env-store operation.

use actix_web::{web, HttpResponse};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use serde_valid::Validate;

use crate::envstore::GenerateOptions;
use crate::errors::{Error, Result};
use crate::forms::{
    DeployParams, EnvGenerateParams, EnvGetParams, EnvHistoryParams, EnvRestoreParams,
    EnvSetParams, PromoteParams, RollbackParams, SlotCleanupParams, SlotStatusParams, ToolRequest,
};
use crate::startup::AppState;

const DEFAULT_HISTORY_LIMIT: usize = 20;

#[tracing::instrument(name = "Tool call.", skip(state, body), fields(tool = %body.tool))]
pub async fn tools(state: web::Data<AppState>, body: web::Json<ToolRequest>) -> HttpResponse {
    let ToolRequest { tool, params } = body.into_inner();

    match dispatch(state.get_ref(), &tool, params).await {
        Ok(data) => HttpResponse::Ok().json(json!({ "success": true, "data": data })),
        Err(err) => {
            tracing::warn!("tool {} failed: {}", tool, err);
            HttpResponse::build(err.http_status()).json(json!({
                "success": false,
                "error": {
                    "code": err.code(),
                    "message": err.to_string(),
                    "details": err.details(),
                },
            }))
        }
    }
}

async fn dispatch(state: &AppState, tool: &str, params: Value) -> Result<Value> {
    match tool {
        "deploy" => {
            let p: DeployParams = parse(params)?;
            let result = state
                .engine
                .deploy(
                    &p.project_name,
                    p.environment,
                    &p.version,
                    p.image,
                    p.skip_healthcheck,
                )
                .await?;
            to_value(result)
        }
        "promote" => {
            let p: PromoteParams = parse(params)?;
            let result = state.engine.promote(&p.project_name, p.environment).await?;
            to_value(result)
        }
        "rollback" => {
            let p: RollbackParams = parse(params)?;
            let result = state
                .engine
                .rollback(&p.project_name, p.environment, p.reason)
                .await?;
            to_value(result)
        }
        "slot_status" => {
            let p: SlotStatusParams = parse(params)?;
            let mut registries = state.engine.status(&p.project_name, p.environment).await?;
            if p.environment.is_some() {
                to_value(registries.remove(0))
            } else {
                to_value(registries)
            }
        }
        "slot_list" => {
            let registries = state.engine.list().await?;
            to_value(registries)
        }
        "slot_cleanup" => {
            let p: SlotCleanupParams = parse(params)?;
            let result = state
                .engine
                .cleanup(&p.project_name, p.environment, p.force)
                .await?;
            to_value(result)
        }
        "env_get" => {
            let p: EnvGetParams = parse(params)?;
            match p.key {
                Some(key) => {
                    let value = state
                        .envs
                        .get_one(&p.project_name, p.environment, &key)
                        .await?;
                    Ok(json!({ "key": key, "value": value }))
                }
                None => {
                    let vars = state.envs.get_all(&p.project_name, p.environment).await?;
                    to_value(vars)
                }
            }
        }
        "env_set" => {
            let p: EnvSetParams = parse(params)?;
            state
                .envs
                .set(&p.project_name, p.environment, &p.key, &p.value)
                .await?;
            Ok(json!({ "key": p.key }))
        }
        "env_restore" => {
            let p: EnvRestoreParams = parse(params)?;
            state
                .envs
                .restore(&p.project_name, p.environment, &p.version)
                .await?;
            Ok(json!({ "restored": p.version }))
        }
        "env_history" => {
            let p: EnvHistoryParams = parse(params)?;
            let files = state
                .envs
                .history(
                    &p.project_name,
                    p.environment,
                    p.limit.unwrap_or(DEFAULT_HISTORY_LIMIT),
                )
                .await?;
            to_value(files)
        }
        "env_generate" => {
            let p: EnvGenerateParams = parse(params)?;
            let vars = state
                .envs
                .auto_generate(
                    &p.project_name,
                    p.environment,
                    GenerateOptions {
                        database: p.database,
                        cache: p.cache,
                        pubsub: p.pubsub,
                    },
                )
                .await?;
            to_value(vars)
        }
        other => Err(Error::InvalidInput(format!("unknown tool '{}'", other))),
    }
}

fn parse<T: DeserializeOwned + Validate>(params: Value) -> Result<T> {
    let parsed: T = serde_json::from_value(params)
        .map_err(|e| Error::InvalidInput(format!("invalid params: {}", e)))?;
    parsed
        .validate()
        .map_err(|e| Error::InvalidInput(e.to_string()))?;
    Ok(parsed)
}

fn to_value<T: Serialize>(value: T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| Error::Internal(format!("serializing result: {}", e)))
}
