use anyhow::{Context, Result};
use ncli_core::test_run::describe_suite;
use ncli_core::testsuite::SuiteSet;
use ncli_execution::{Client, ClientOptions};

fn load(options: ClientOptions) -> Result<SuiteSet> {
    let client = Client::build(options).context("cannot load suites")?;
    Ok(client.context.suites().clone())
}

pub fn list(options: ClientOptions) -> Result<()> {
    let suites = load(options)?;
    if suites.suites.is_empty() {
        println!("no test suites");
    }
    for line in list_lines(&suites) {
        println!("{line}");
    }
    Ok(())
}

pub fn show(options: ClientOptions, name: &str) -> Result<()> {
    let suites = load(options)?;
    let suite = suites
        .find(name)
        .with_context(|| format!("test suite '{name}' not found"))?;
    print!("{}", describe_suite(suite));
    Ok(())
}

fn list_lines(suites: &SuiteSet) -> Vec<String> {
    suites
        .suites
        .iter()
        .map(|s| format!("{:<24} {} tests", s.name, s.tests.len()))
        .collect()
}
