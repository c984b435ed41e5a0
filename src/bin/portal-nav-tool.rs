use std::sync::Arc;

use clap::{Parser, ValueEnum};
use serde_json::{json, to_string, to_string_pretty, Value};
use url::Url;

use portal_nav::{
    access::PolicyAccessHandling,
    assemble,
    config::{load, EnvConfig, PortalConfig},
    config_source::{make_local_source, make_remote_source, ConfigSource},
    local_overlay::make_local_overlay,
    logging::init_logging,
    ChildrenByEntityAggregator, Context, NavigationNode, NavigationTreeBuilder,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    // Pretty-printed JSON.
    Pretty,
    // Un-pretty-printed JSON.
    Concise,
}

/// Resolve one route of the portal navigation and print the node it lands on
/// together with its children.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// URL of the portal server to query or the path to a fixture directory
    /// if using local data.
    #[arg(long, env = "PORTAL_NAV_SERVER")]
    server: String,

    /// Bearer token for the portal server.
    #[arg(long, env = "PORTAL_NAV_TOKEN")]
    token: Option<String>,

    /// Portal config JSON file.
    #[arg(long)]
    portal_config: Option<String>,

    /// Environment config JSON file.
    #[arg(long)]
    env_config: Option<String>,

    /// Local navigation nodes to overlay over the server's.  Only used when
    /// the env config marks a development instance.
    #[arg(long)]
    local_nodes: Option<String>,

    /// Navigation context as a JSON object, e.g. '{"tenantid": "t1"}'.
    #[arg(long, default_value = "{}")]
    context: String,

    /// Hide nodes whose requiredPolicies are not granted by the context.
    #[arg(long)]
    check_policies: bool,

    #[arg(long, short, value_enum, default_value = "concise")]
    output_format: OutputFormat,

    /// Route to resolve, e.g. "/home/projects/p1".
    route: String,
}

fn summarize(node: &NavigationNode) -> Value {
    json!({
        "pathSegment": node.path_segment,
        "label": node.label,
        "entityType": node.entity_type,
        "viewUrl": node.view_url,
        "context": node.context,
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    let args = Args::parse();

    let config_source: Arc<dyn ConfigSource + Send + Sync> =
        if args.server.starts_with("http://") || args.server.starts_with("https://") {
            Arc::from(make_remote_source(Url::parse(&args.server)?, args.token)?)
        } else {
            Arc::from(make_local_source(&args.server)?)
        };

    let portal_config: PortalConfig = match &args.portal_config {
        Some(path) => load(path)?,
        None => PortalConfig::default(),
    };
    let env_config: EnvConfig = match &args.env_config {
        Some(path) => load(path)?,
        None => EnvConfig::default(),
    };

    let local_overlay = make_local_overlay(&env_config, args.local_nodes.as_deref());

    let mut builder = NavigationTreeBuilder::new(config_source.clone(), portal_config, env_config)
        .with_local_overlay(local_overlay.clone());
    if args.check_policies {
        builder = builder.with_access_handling(Arc::new(PolicyAccessHandling));
    }

    let children_by_entity = ChildrenByEntityAggregator::new(config_source, local_overlay)
        .retrieve_children_by_entity()
        .await?;
    let navigation = assemble(&builder, children_by_entity);

    let mut ctx: Context = serde_json::from_str(&args.context)?;
    for (key, value) in &navigation.global_context {
        ctx.entry(key.clone()).or_insert_with(|| value.clone());
    }

    let output = match navigation.resolve_route(&args.route, ctx).await {
        Some(resolved) => json!({
            "node": summarize(&resolved.node),
            "children": resolved.children.iter().map(summarize).collect::<Vec<_>>(),
            "context": resolved.ctx,
        }),
        None => {
            eprintln!("No node matches {}", args.route);
            std::process::exit(1);
        }
    };

    match args.output_format {
        OutputFormat::Concise => println!("{}", to_string(&output)?),
        OutputFormat::Pretty => println!("{}", to_string_pretty(&output)?),
    }
    Ok(())
}
