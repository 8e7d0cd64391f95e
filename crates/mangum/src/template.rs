//! CloudFormation template for a Lambda-backed ASGI application.

use serde_json::{json, Map, Value};

use crate::config::Descriptor;

const BASIC_EXECUTION_POLICY: &str =
    "arn:aws:iam::aws:policy/service-role/AWSLambdaBasicExecutionRole";
const S3_FULL_ACCESS_POLICY: &str = "arn:aws:iam::aws:policy/AmazonS3FullAccess";
const DYNAMODB_FULL_ACCESS_POLICY: &str = "arn:aws:iam::aws:policy/AmazonDynamoDBFullAccess";

pub const WEBSOCKET_STAGE: &str = "Prod";
const WEBSOCKET_ROUTES: [(&str, &str); 3] = [
    ("Connect", "$connect"),
    ("Disconnect", "$disconnect"),
    ("Default", "$default"),
];

/// Where the Lambda code archive lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeLocation {
    pub bucket: String,
    pub key: String,
}

/// `my-shop-api` -> `MyShopApi`. Used to prefix logical ids.
pub fn resource_prefix(name: &str) -> String {
    name.split('-')
        .map(|part| {
            let part: String = part.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

pub fn render(descriptor: &Descriptor, code: &CodeLocation) -> Value {
    let p = resource_prefix(&descriptor.name);
    let role = format!("{p}Role");
    let function = format!("{p}Function");
    let http_api = format!("{p}HttpApi");

    let mut policies = vec![BASIC_EXECUTION_POLICY];
    if descriptor.s3_access {
        policies.push(S3_FULL_ACCESS_POLICY);
    }
    if descriptor.dynamodb_access {
        policies.push(DYNAMODB_FULL_ACCESS_POLICY);
    }

    let mut resources = Map::new();
    resources.insert(
        role.clone(),
        json!({
            "Type": "AWS::IAM::Role",
            "Properties": {
                "AssumeRolePolicyDocument": {
                    "Version": "2012-10-17",
                    "Statement": [{
                        "Effect": "Allow",
                        "Principal": {"Service": "lambda.amazonaws.com"},
                        "Action": "sts:AssumeRole"
                    }]
                },
                "ManagedPolicyArns": policies,
            }
        }),
    );
    resources.insert(
        function.clone(),
        json!({
            "Type": "AWS::Lambda::Function",
            "Properties": {
                "Code": {"S3Bucket": code.bucket, "S3Key": code.key},
                "Handler": descriptor.handler,
                "Runtime": descriptor.runtime,
                "Timeout": descriptor.timeout,
                "Role": {"Fn::GetAtt": [role, "Arn"]},
            }
        }),
    );
    resources.insert(
        http_api.clone(),
        json!({
            "Type": "AWS::ApiGatewayV2::Api",
            "Properties": {
                "Name": descriptor.name,
                "ProtocolType": "HTTP",
                "Target": {"Fn::GetAtt": [function, "Arn"]},
            }
        }),
    );
    resources.insert(format!("{http_api}Permission"), invoke_permission(&function, &http_api));

    let mut outputs = Map::new();
    outputs.insert(
        "FunctionName".to_string(),
        json!({"Description": "Lambda function name", "Value": {"Ref": function}}),
    );
    outputs.insert(
        "ApiEndpoint".to_string(),
        json!({"Description": "HTTP API endpoint", "Value": {"Fn::GetAtt": [http_api, "ApiEndpoint"]}}),
    );

    if descriptor.websockets {
        add_websocket_resources(&p, &descriptor.name, &function, &mut resources, &mut outputs);
    }

    json!({
        "AWSTemplateFormatVersion": "2010-09-09",
        "Description": format!("mangum deployment for {}", descriptor.name),
        "Resources": resources,
        "Outputs": outputs,
    })
}

fn invoke_permission(function: &str, api: &str) -> Value {
    json!({
        "Type": "AWS::Lambda::Permission",
        "Properties": {
            "Action": "lambda:InvokeFunction",
            "FunctionName": {"Ref": function},
            "Principal": "apigateway.amazonaws.com",
            "SourceArn": {
                "Fn::Sub": format!("arn:${{AWS::Partition}}:execute-api:${{AWS::Region}}:${{AWS::AccountId}}:${{{api}}}/*")
            },
        }
    })
}

fn add_websocket_resources(
    p: &str,
    name: &str,
    function: &str,
    resources: &mut Map<String, Value>,
    outputs: &mut Map<String, Value>,
) {
    let api = format!("{p}WebSocketApi");
    let integration = format!("{p}WebSocketIntegration");
    let deployment = format!("{p}WebSocketDeployment");

    resources.insert(
        api.clone(),
        json!({
            "Type": "AWS::ApiGatewayV2::Api",
            "Properties": {
                "Name": format!("{name}-websocket"),
                "ProtocolType": "WEBSOCKET",
                "RouteSelectionExpression": "$request.body.action",
            }
        }),
    );
    resources.insert(
        integration.clone(),
        json!({
            "Type": "AWS::ApiGatewayV2::Integration",
            "Properties": {
                "ApiId": {"Ref": api},
                "IntegrationType": "AWS_PROXY",
                "IntegrationUri": {
                    "Fn::Sub": format!("arn:${{AWS::Partition}}:apigateway:${{AWS::Region}}:lambda:path/2015-03-31/functions/${{{function}.Arn}}/invocations")
                },
            }
        }),
    );

    let mut routes = Vec::new();
    for (suffix, route_key) in WEBSOCKET_ROUTES {
        let route = format!("{p}WebSocket{suffix}Route");
        resources.insert(
            route.clone(),
            json!({
                "Type": "AWS::ApiGatewayV2::Route",
                "Properties": {
                    "ApiId": {"Ref": api},
                    "RouteKey": route_key,
                    "Target": {"Fn::Join": ["/", ["integrations", {"Ref": integration}]]},
                }
            }),
        );
        routes.push(route);
    }

    resources.insert(
        deployment.clone(),
        json!({
            "Type": "AWS::ApiGatewayV2::Deployment",
            "DependsOn": routes,
            "Properties": {"ApiId": {"Ref": api}}
        }),
    );
    resources.insert(
        format!("{p}WebSocketStage"),
        json!({
            "Type": "AWS::ApiGatewayV2::Stage",
            "Properties": {
                "ApiId": {"Ref": api},
                "StageName": WEBSOCKET_STAGE,
                "DeploymentId": {"Ref": deployment},
            }
        }),
    );
    resources.insert(format!("{api}Permission"), invoke_permission(function, &api));

    outputs.insert(
        "WebSocketEndpoint".to_string(),
        json!({
            "Description": "WebSocket API endpoint",
            "Value": {"Fn::Sub": format!("${{{api}.ApiEndpoint}}/{WEBSOCKET_STAGE}")}
        }),
    );
}
