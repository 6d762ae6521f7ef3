mod docker;

pub use docker::DockerRunner;
