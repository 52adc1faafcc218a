mod jobs;
mod lifecycle;
mod safe;
mod settler;
mod staking;
