mod mock_pipeline;
mod runner;
mod supervisor;
