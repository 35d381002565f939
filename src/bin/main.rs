mod opt;

use crate::opt::Opt;

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::Parser;
use env_logger::Env;
use log::{debug, info, warn};
use stackhist::{
    aggregate::{config_hist, group_members, GroupHist},
    config::{ConfigStore, Environment},
    factory::{FactoryContextBuilder, HistFactory},
    output::{mirror, save_plot, save_plot_as, write_event_counts, OutputPaths},
    plot::{make_plot, PlotOptions},
    weights::WeightSelector,
    GIT_BRANCH, GIT_REV, VERSION,
};

fn main() -> Result<()> {
    let args = argfile::expand_args_from(
        std::env::args_os(),
        argfile::parse_fromfile,
        argfile::PREFIX,
    )
    .with_context(|| "Failed to read argument file")?;
    let opt = Opt::parse_from(args).validate()?;

    let env = Env::default().filter_or("STACKHIST_LOG", opt.log_level());
    env_logger::init_from_env(env);

    rayon::ThreadPoolBuilder::new()
        .num_threads(opt.threads)
        .build_global()?;

    if let (Some(rev), Some(branch)) = (GIT_REV, GIT_BRANCH) {
        info!("stackhist {VERSION} rev {rev} ({branch})");
    } else {
        info!("stackhist {VERSION}");
    }

    debug!("settings: {:#?}", opt);

    run(opt)?;
    info!("done");
    Ok(())
}

fn run(opt: Opt) -> Result<()> {
    let environment = environment(&opt)?;
    debug!("environment: {environment:?}");

    let config = ConfigStore::load(&opt.config_dir, &opt.selection).with_context(|| {
        format!("Failed to load configuration from {:?}", opt.config_dir)
    })?;
    if !config.load_errors().is_empty() {
        warn!(
            "{} configuration file(s) could not be read",
            config.load_errors().len()
        );
    }

    let stack = config.resolve_file_set(&opt.files_to_plot);
    let signals = config.resolve_file_set(&opt.signal_files);
    let data = opt.data_group().map(str::to_owned);
    if stack.is_empty() && signals.is_empty() && data.is_none() {
        bail!("Nothing to plot");
    }
    let states: Vec<String> = if opt.channels.is_empty() {
        config.states().keys().cloned().collect()
    } else {
        opt.channels.clone()
    };
    info!("Summing over states {states:?}");

    let luminosity = opt.luminosity();
    let context = FactoryContextBuilder::default()
        // in inverse pb
        .luminosity(luminosity.map(|l| 1000. * l).unwrap_or(1.))
        .cut(opt.cut.as_str())
        .weight(opt.weight.as_str())
        .weight_sum(WeightSelector::from_name(&opt.weight_sum))
        .reconstruction(opt.particle_def.into())
        .build()?;

    let mut processes = Vec::new();
    for group in stack.iter().chain(&signals).chain(&data) {
        for member in group_members(&config, group) {
            if !processes.contains(&member) {
                processes.push(member);
            }
        }
    }
    let factory = HistFactory::build(&context, &config, &processes)?;
    info!("Loaded {} process(es)", factory.len());
    let data = data.filter(|data| {
        let loaded = group_members(&config, data)
            .iter()
            .any(|member| factory.contains(member));
        if !loaded {
            warn!("No events loaded for data `{data}`, plotting without data");
        }
        loaded
    });

    let paths = OutputPaths::dated(
        &environment.storage_root,
        &opt.selection,
        opt.folder_name.as_deref(),
        &Local::now(),
    );

    for branch in &opt.branches {
        if config.hist_bin_info(branch).is_none() {
            warn!("Skipping `{branch}`: no binning defined");
            continue;
        }
        info!("Plotting {branch}");
        let hists = |groups: &[String]| -> Result<Vec<GroupHist>> {
            groups
                .iter()
                .map(|g| {
                    config_hist(&config, g, branch, &states, &factory)
                        .with_context(|| format!("Failed to fill `{branch}` for `{g}`"))
                })
                .collect()
        };
        let stack_hists = hists(&stack)?;
        let signal_hists = hists(&signals)?;
        let data_hist = match &data {
            Some(data) => hists(std::slice::from_ref(data))?.pop(),
            None => None,
        };

        let options = plot_options(&opt, &config, branch);
        let plot = make_plot(&stack_hists, &signal_hists, data_hist.as_ref(), &options)
            .with_context(|| format!("Failed to make plot for `{branch}`"))?;

        let name = if opt.append_to_name.is_empty() {
            branch.to_owned()
        } else {
            format!("{branch}_{}", opt.append_to_name)
        };

        if let Some(file) = &opt.output_file {
            save_plot_as(&plot, file)?;
            continue;
        }

        paths.create()?;
        let mut written = save_plot(&plot, paths.dir(), &name)?;
        if opt.event_counts {
            let groups: Vec<_> = stack_hists
                .iter()
                .chain(&signal_hists)
                .chain(&data_hist)
                .collect();
            written.push(write_event_counts(paths.dir(), &name, &groups)?);
        }
        match &environment.html_root {
            Some(html_root) if !opt.no_html => {
                mirror(&written, &environment.storage_root, html_root)?;
                info!("Mirrored output to {html_root:?}");
            }
            _ => {}
        }
    }
    Ok(())
}

fn environment(opt: &Opt) -> Result<Environment> {
    let storage_root = match &opt.storage_root {
        Some(root) => root.clone(),
        None => {
            let Some(home) = dirs::home_dir() else {
                bail!("No home directory found, please set --storage-root")
            };
            home.join("stackhist")
        }
    };
    Ok(Environment {
        storage_root,
        html_root: opt.html_root.clone(),
    })
}

fn plot_options(opt: &Opt, config: &ConfigStore, branch: &str) -> PlotOptions {
    let bins = config.hist_bin_info(branch);
    let x_title = bins
        .and_then(|b| b.x_title.clone())
        .unwrap_or_else(|| branch.to_owned());
    let luminosity = opt.luminosity();
    let y_title = bins.and_then(|b| b.y_title.clone()).unwrap_or_else(|| {
        if luminosity.is_some() {
            "Events".to_owned()
        } else {
            "Normalised events".to_owned()
        }
    });
    let mut options = PlotOptions::builder()
        .stacked(!opt.no_stack)
        .stack_signal(opt.stack_signal)
        .logy(opt.logy)
        .legend(opt.legend)
        .ratio(!opt.no_ratio)
        .ratio_range(opt.ratio_range)
        .ratio_title(opt.ratio_text.as_str())
        .fold_overflow(!opt.no_overflow)
        .unit_norm(luminosity.is_none())
        .x_title(x_title)
        .y_title(y_title)
        .scale_ymax(opt.scale_ymax)
        .scale_ymin(opt.scale_ymin)
        .decorations(!opt.no_decorations)
        .simulation(opt.simulation)
        .preliminary(opt.preliminary)
        .thesis(opt.thesis)
        .energy(opt.energy)
        .build();
    options.uncertainties = opt.uncertainties;
    options.rebin = opt.rebin.clone();
    options.luminosity = luminosity;
    options.extra_text = opt.extra_text.clone();
    options
}
