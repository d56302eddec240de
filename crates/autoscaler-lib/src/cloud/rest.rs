//! JSON-over-HTTP implementation of `AutoScalingApi`
//!
//! Each action is a `POST <endpoint>/<Action>` carrying the request as a JSON
//! body. Non-2xx responses carry `{"Code": "...", "Message": "..."}`.

use super::*;
use crate::error::CloudError;
use serde::de::DeserializeOwned;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone)]
pub struct RestConfig {
    pub endpoint: String,
    pub connect_timeout: Duration,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:4566".to_string(),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct NamesRequest {
    names: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct TemplateVersionRequest {
    launch_template_name: String,
    version: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct TokenRequest {
    next_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LaunchConfigurationsResponse {
    #[serde(default)]
    launch_configurations: Vec<LaunchConfiguration>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LaunchTemplateVersionsResponse {
    #[serde(default)]
    launch_template_versions: Vec<LaunchTemplateVersion>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TerminateResponse {
    #[serde(default)]
    activity: ScalingActivity,
}

/// HTTP client for the cloud auto-scaling REST surface
pub struct RestAutoScalingApi {
    client: reqwest::Client,
    base: Url,
}

impl RestAutoScalingApi {
    pub fn new(config: RestConfig) -> Result<Self> {
        let mut base = Url::parse(&config.endpoint)
            .map_err(|e| CloudError::Config(format!("invalid endpoint {}: {e}", config.endpoint)))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| CloudError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, base })
    }

    fn action_url(&self, action: &str) -> Result<Url> {
        self.base
            .join(action)
            .map_err(|e| CloudError::Config(format!("invalid action {action}: {e}")))
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(&self, action: &str, body: &B) -> Result<T> {
        let response = self
            .client
            .post(self.action_url(action)?)
            .json(body)
            .send()
            .await
            .map_err(|e| CloudError::backend(format!("{action}: {e}")))?;

        let status = response.status();
        if status.is_success() {
            let bytes = response
                .bytes()
                .await
                .map_err(|e| CloudError::backend(format!("{action}: {e}")))?;
            let payload: &[u8] = if bytes.is_empty() { b"{}" } else { &bytes };
            return serde_json::from_slice(payload)
                .map_err(|e| CloudError::backend(format!("{action}: malformed response: {e}")));
        }

        let body = response.text().await.unwrap_or_default();
        let parsed: Option<ErrorBody> = serde_json::from_str(&body).ok();
        let message = parsed
            .as_ref()
            .map(|b| b.message.clone())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| format!("{action} returned {status}"));

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(CloudError::NotFound(message));
        }
        Err(CloudError::Backend {
            code: parsed
                .and_then(|b| b.code)
                .or_else(|| Some(status.as_u16().to_string())),
            message,
        })
    }
}

#[async_trait]
impl AutoScalingApi for RestAutoScalingApi {
    async fn describe_auto_scaling_groups(
        &self,
        request: DescribeGroupsRequest,
    ) -> Result<DescribeGroupsPage> {
        self.post("DescribeAutoScalingGroups", &request).await
    }

    async fn describe_launch_configurations(
        &self,
        names: Vec<String>,
    ) -> Result<Vec<LaunchConfiguration>> {
        let response: LaunchConfigurationsResponse = self
            .post("DescribeLaunchConfigurations", &NamesRequest { names })
            .await?;
        Ok(response.launch_configurations)
    }

    async fn describe_launch_template_versions(
        &self,
        name: String,
        version: String,
    ) -> Result<Vec<LaunchTemplateVersion>> {
        let request = TemplateVersionRequest {
            launch_template_name: name,
            version,
        };
        let response: LaunchTemplateVersionsResponse = self
            .post("DescribeLaunchTemplateVersions", &request)
            .await?;
        Ok(response.launch_template_versions)
    }

    async fn describe_tags(&self, request: DescribeTagsRequest) -> Result<DescribeTagsPage> {
        self.post("DescribeTags", &request).await
    }

    async fn set_desired_capacity(&self, request: SetDesiredCapacityRequest) -> Result<()> {
        let _: serde_json::Value = self.post("SetDesiredCapacity", &request).await?;
        Ok(())
    }

    async fn terminate_instance_in_auto_scaling_group(
        &self,
        request: TerminateInstanceRequest,
    ) -> Result<ScalingActivity> {
        let response: TerminateResponse = self
            .post("TerminateInstanceInAutoScalingGroup", &request)
            .await?;
        Ok(response.activity)
    }

    async fn describe_instance_types(
        &self,
        next_token: Option<String>,
    ) -> Result<DescribeInstanceTypesPage> {
        self.post("DescribeInstanceTypes", &TokenRequest { next_token })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_url_keeps_base_path() {
        let api = RestAutoScalingApi::new(RestConfig {
            endpoint: "http://cloud.local:8080/autoscaling".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(
            api.action_url("DescribeTags").unwrap().as_str(),
            "http://cloud.local:8080/autoscaling/DescribeTags"
        );
    }

    #[test]
    fn test_invalid_endpoint_is_config_error() {
        let err = RestAutoScalingApi::new(RestConfig {
            endpoint: "not a url".to_string(),
            ..Default::default()
        })
        .err()
        .unwrap();
        assert!(matches!(err, CloudError::Config(_)));
    }

    #[test]
    fn test_group_wire_format_defaults() {
        let json = r#"{
            "AutoScalingGroupName": "workers",
            "MinSize": 1,
            "MaxSize": 5,
            "DesiredCapacity": 2,
            "LaunchTemplate": {"LaunchTemplateName": "lt"}
        }"#;
        let group: AutoScalingGroup = serde_json::from_str(json).unwrap();
        assert_eq!(group.auto_scaling_group_name, "workers");
        assert_eq!(group.launch_template.unwrap().version, None);
        assert!(group.instances.is_empty());
    }

    fn api_for(server: &mockito::Server) -> RestAutoScalingApi {
        RestAutoScalingApi::new(RestConfig {
            endpoint: server.url(),
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_describe_groups_posts_json() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/DescribeAutoScalingGroups")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "AutoScalingGroupNames": ["workers"],
                "MaxRecords": 50
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"AutoScalingGroups": [{
                    "AutoScalingGroupName": "workers",
                    "MinSize": 1, "MaxSize": 5, "DesiredCapacity": 2
                }]}"#,
            )
            .create_async()
            .await;

        let page = api_for(&server)
            .describe_auto_scaling_groups(DescribeGroupsRequest {
                auto_scaling_group_names: vec!["workers".into()],
                max_records: 50,
                next_token: None,
            })
            .await
            .unwrap();
        mock.assert_async().await;
        assert_eq!(page.auto_scaling_groups[0].desired_capacity, 2);
        assert_eq!(page.next_token, None);
    }

    #[tokio::test]
    async fn test_not_found_maps_to_not_found() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/DescribeLaunchConfigurations")
            .with_status(404)
            .with_body(r#"{"Code": "ValidationError", "Message": "no such configuration"}"#)
            .create_async()
            .await;

        let err = api_for(&server)
            .describe_launch_configurations(vec!["lc".into()])
            .await
            .unwrap_err();
        assert_eq!(err, CloudError::NotFound("no such configuration".into()));
    }

    #[tokio::test]
    async fn test_error_code_from_body() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/SetDesiredCapacity")
            .with_status(400)
            .with_body(r#"{"Code": "Throttling", "Message": "Rate exceeded"}"#)
            .create_async()
            .await;

        let err = api_for(&server)
            .set_desired_capacity(SetDesiredCapacityRequest {
                auto_scaling_group_name: "workers".into(),
                desired_capacity: 3,
                honor_cooldown: false,
            })
            .await
            .unwrap_err();
        assert_eq!(err, CloudError::backend_with_code("Throttling", "Rate exceeded"));
        assert_eq!(err.status_label(), "Throttling");
    }

    #[tokio::test]
    async fn test_error_without_body_uses_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/DescribeTags")
            .with_status(503)
            .with_body("upstream unavailable")
            .create_async()
            .await;

        let err = api_for(&server)
            .describe_tags(DescribeTagsRequest {
                filters: vec![],
                max_records: 100,
                next_token: None,
            })
            .await
            .unwrap_err();
        match err {
            CloudError::Backend { code, message } => {
                assert_eq!(code.as_deref(), Some("503"));
                assert!(message.contains("DescribeTags"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_success_body() {
        let mut server = mockito::Server::new_async().await;
        let _resize = server
            .mock("POST", "/SetDesiredCapacity")
            .with_status(200)
            .create_async()
            .await;
        let _terminate = server
            .mock("POST", "/TerminateInstanceInAutoScalingGroup")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "InstanceId": "i-1",
                "ShouldDecrementDesiredCapacity": true
            })))
            .with_status(200)
            .create_async()
            .await;

        let api = api_for(&server);
        api.set_desired_capacity(SetDesiredCapacityRequest {
            auto_scaling_group_name: "workers".into(),
            desired_capacity: 1,
            honor_cooldown: false,
        })
        .await
        .unwrap();
        let activity = api
            .terminate_instance_in_auto_scaling_group(TerminateInstanceRequest {
                instance_id: "i-1".into(),
                should_decrement_desired_capacity: true,
            })
            .await
            .unwrap();
        assert_eq!(activity, ScalingActivity::default());
    }
}
